pub mod config;
pub mod emoji;
pub mod page;
pub mod processor;
pub mod watcher;

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::EmojiConfig;
use emoji::{EmojiCatalogCache, EmojiError, HttpCatalogFetcher, TextRewriter};
use page::Document;
use processor::{CommentProcessor, ProcessReport};
use watcher::ChangeWatcher;

/// ページ単位の共有状態
///
/// キャッシュはページの寿命の間だけ保持する（ページ再読み込みで作り直す）
pub struct EmojiRuntime {
    pub document: Arc<Document>,
    pub cache: Arc<EmojiCatalogCache<HttpCatalogFetcher>>,
    pub processor: Arc<CommentProcessor<HttpCatalogFetcher>>,
}

impl EmojiRuntime {
    /// レイアウトを判定して処理系を組み立てる
    pub fn new(document: Arc<Document>, config: &EmojiConfig) -> Result<Self, EmojiError> {
        let fetcher = HttpCatalogFetcher::new(config)?;
        let cache = Arc::new(EmojiCatalogCache::new(fetcher));
        let source = page::detect_layout(Arc::clone(&document));
        let processor = Arc::new(CommentProcessor::new(
            source,
            Arc::clone(&cache),
            TextRewriter::from_config(config),
        ));

        Ok(Self {
            document,
            cache,
            processor,
        })
    }

    /// 既存コメントを処理してから変更監視を開始する
    pub async fn start(&self) -> (ProcessReport, ChangeWatcher) {
        // 初回スキャン中に追加されたノードも拾えるよう先に購読する
        let batches = self.document.subscribe();
        let report = self.processor.process_page().await;
        let watcher = ChangeWatcher::start(Arc::clone(&self.processor), batches);
        (report, watcher)
    }

    /// 全コメントの現在の本文
    pub fn comment_bodies(&self) -> Vec<String> {
        let source = self.processor.source();
        source
            .list_comments()
            .iter()
            .filter_map(|comment| source.body_element(comment))
            .filter_map(|body| source.read_body(body))
            .collect()
    }
}

/// ファイルからページを読み込む
pub fn load_page(path: &Path) -> std::io::Result<Document> {
    let html = std::fs::read_to_string(path)?;
    Ok(Document::parse(&html))
}

/// コマンドライン引数
#[derive(Debug, Parser)]
#[command(name = "comment-emoji", version, about)]
struct Cli {
    /// 処理するページのHTMLファイル
    page: PathBuf,

    /// 処理後のコメント本文も出力する
    #[arg(long)]
    dump: bool,
}

/// CLIエントリポイント
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = EmojiConfig::from_env();
    let document = Arc::new(load_page(&cli.page)?);
    log::info!("Loaded page {:?} ({} elements)", cli.page, document.len());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let emoji = EmojiRuntime::new(document, &config)?;
        let (report, watcher) = emoji.start().await;
        watcher.shutdown().await;

        println!("{}", serde_json::to_string_pretty(&report)?);
        if cli.dump {
            for body in emoji.comment_bodies() {
                println!("{}", body);
            }
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_page() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"<html><body><div class="commentarea">
                 <div class="comment" data-subreddit="rust">
                   <div class="usertext-body"><div class="md">hi :5:</div></div>
                 </div>
               </div></body></html>"#
        )
        .unwrap();

        let doc = load_page(file.path()).unwrap();
        assert!(!doc.is_empty());
    }

    #[test]
    fn test_load_page_missing_file() {
        let result = load_page(Path::new("/nonexistent/page.html"));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_runtime_end_to_end_with_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/emotes")
            .match_query(mockito::Matcher::UrlEncoded(
                "subredditName".into(),
                "rust".into(),
            ))
            .with_status(200)
            .with_body(r#"<img data-media-id="emote|t5_x|5" src="https://x/e5.png">"#)
            .expect(1)
            .create_async()
            .await;

        let config = EmojiConfig::default().with_catalog_url(format!("{}/emotes", server.url()));
        let document = Arc::new(Document::parse(
            r#"<html><body><div class="commentarea">
                 <div class="comment" data-subreddit="rust">
                   <div class="usertext-body"><div class="md">hi :5: there :9:</div></div>
                 </div>
                 <div class="comment" data-subreddit="rust">
                   <div class="usertext-body"><div class="md">:5:</div></div>
                 </div>
               </div></body></html>"#,
        ));

        let runtime = EmojiRuntime::new(document, &config).unwrap();
        let (report, watcher) = runtime.start().await;
        watcher.shutdown().await;

        assert_eq!(report.comments_rewritten, 2);
        assert_eq!(runtime.cache.resolved_count(), 1);

        let bodies = runtime.comment_bodies();
        assert!(bodies[0].starts_with("hi <img "));
        assert!(bodies[0].ends_with(" there :9:"));
        mock.assert_async().await;
    }
}
