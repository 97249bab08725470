//! 絵文字プレースホルダー置換
//!
//! コメント本文中の`:<数字>:`形式のトークンを、カタログにあれば`<img>`に置き換える。
//! タグの内側（属性値など）にあるトークンは置換対象にしない。
//! 置換後の`<img>`は`title`/`alt`に元のトークンを持つが、タグ内なので再置換されない。

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

use super::types::EmojiCatalog;
use crate::config::{EmojiConfig, DEFAULT_EMOJI_SIZE_PX, EMOJI_IMG_CLASS};

/// 絵文字プレースホルダーパターン（:12345:形式、ASCII数字のみ）
static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([0-9]+):").expect("Failed to compile emoji placeholder regex"));

/// 本文中のプレースホルダートークン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderToken<'a> {
    /// マッチしたテキスト（例: `:5:`）
    pub text: &'a str,
    /// 埋め込まれた絵文字ID（例: `5`）
    pub emoji_id: &'a str,
    pub start: usize,
    pub end: usize,
}

/// 走査位置の状態
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    #[default]
    Text,
    Tag,
    /// 引用符で囲まれた属性値の中（閉じ引用符を保持）
    Quoted(u8),
}

/// 位置がタグの内側かどうかを前方から順に追跡する
///
/// 属性値中の`>`はエスケープされないので、引用符の内側ではタグを閉じない。
#[derive(Debug, Default)]
struct TagScanner {
    pos: usize,
    state: ScanState,
}

impl TagScanner {
    /// `offset`は単調増加で呼ばれること
    fn in_tag_at(&mut self, body: &str, offset: usize) -> bool {
        for &b in &body.as_bytes()[self.pos..offset] {
            self.state = match (self.state, b) {
                (ScanState::Text, b'<') => ScanState::Tag,
                (ScanState::Tag, b'>') => ScanState::Text,
                (ScanState::Tag, b'"' | b'\'') => ScanState::Quoted(b),
                (ScanState::Quoted(q), c) if c == q => ScanState::Tag,
                (state, _) => state,
            };
        }
        self.pos = offset;
        self.state != ScanState::Text
    }
}

/// 本文中のプレースホルダーを出現順に列挙（重なりなし、タグ内は除外）
pub fn placeholder_tokens(body: &str) -> impl Iterator<Item = PlaceholderToken<'_>> {
    let mut scanner = TagScanner::default();
    PLACEHOLDER_REGEX.captures_iter(body).filter_map(move |caps| {
        let whole = caps.get(0)?;
        if scanner.in_tag_at(body, whole.start()) {
            return None;
        }
        let id = caps.get(1)?;
        Some(PlaceholderToken {
            text: whole.as_str(),
            emoji_id: id.as_str(),
            start: whole.start(),
            end: whole.end(),
        })
    })
}

/// プレースホルダーを1つでも含むか（カタログ解決前の軽量チェック）
pub fn contains_placeholder(body: &str) -> bool {
    placeholder_tokens(body).next().is_some()
}

/// 置換結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome<'a> {
    pub body: Cow<'a, str>,
    /// 画像に置き換えたトークン数
    pub replacements: usize,
}

impl RewriteOutcome<'_> {
    pub fn is_changed(&self) -> bool {
        self.replacements > 0
    }
}

/// プレースホルダーを`<img>`に置き換える
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRewriter {
    size_px: u32,
    class: String,
}

impl TextRewriter {
    pub fn new(size_px: u32) -> Self {
        Self {
            size_px,
            class: EMOJI_IMG_CLASS.to_string(),
        }
    }

    pub fn from_config(config: &EmojiConfig) -> Self {
        Self::new(config.emoji_size_px)
    }

    /// 本文を置換して返す
    pub fn rewrite<'a>(&self, body: &'a str, catalog: &EmojiCatalog) -> Cow<'a, str> {
        self.rewrite_counted(body, catalog).body
    }

    /// 本文を置換し、置換数と共に返す
    ///
    /// カタログに無いIDのトークンは元のテキストのまま残す。
    /// 1件も置換しなかった場合は借用のまま返す。
    pub fn rewrite_counted<'a>(&self, body: &'a str, catalog: &EmojiCatalog) -> RewriteOutcome<'a> {
        let mut result = String::new();
        let mut last_end = 0;
        let mut replacements = 0;

        for token in placeholder_tokens(body) {
            let Some(url) = catalog.get(token.emoji_id) else {
                continue;
            };

            if result.is_empty() {
                result.reserve(body.len() + 64);
            }
            // マッチ前のテキストはそのまま
            result.push_str(&body[last_end..token.start]);
            self.push_img(&mut result, token.text, url);
            last_end = token.end;
            replacements += 1;
        }

        if replacements == 0 {
            return RewriteOutcome {
                body: Cow::Borrowed(body),
                replacements,
            };
        }

        result.push_str(&body[last_end..]);
        RewriteOutcome {
            body: Cow::Owned(result),
            replacements,
        }
    }

    fn push_img(&self, out: &mut String, token: &str, url: &str) {
        out.push_str("<img class=\"");
        out.push_str(&self.class);
        out.push_str("\" src=\"");
        out.push_str(&escape_attr(url));
        out.push_str("\" alt=\"");
        out.push_str(token);
        out.push_str("\" title=\"");
        out.push_str(token);
        out.push_str(&format!(
            "\" width=\"{}\" height=\"{}\">",
            self.size_px, self.size_px
        ));
    }
}

impl Default for TextRewriter {
    fn default() -> Self {
        Self::new(DEFAULT_EMOJI_SIZE_PX)
    }
}

/// 属性値用のエスケープ
fn escape_attr(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '"', '<', '>']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 16);
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}
