fn main() {
    if let Err(e) = comment_emoji_lib::run() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
