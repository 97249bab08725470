//! 絵文字カタログ解決モジュール
//!
//! コミュニティ（subreddit）ごとの絵文字カタログを取得・キャッシュし、
//! コメント本文の`:<数字>:`プレースホルダーを画像に置き換える。
//!
//! ## 構成
//! - `fetcher`: カタログの取得とHTMLからの抽出
//! - `cache`: シングルフライト + ネガティブキャッシュ
//! - `rewriter`: プレースホルダー置換

pub mod cache;
pub mod errors;
pub mod fetcher;
pub mod rewriter;
pub mod types;

pub use cache::{EmojiCatalogCache, Resolution};
pub use errors::EmojiError;
pub use fetcher::{parse_catalog_document, CatalogFetcher, HttpCatalogFetcher};
pub use rewriter::{contains_placeholder, placeholder_tokens, PlaceholderToken, RewriteOutcome, TextRewriter};
pub use types::{CatalogDocument, CommunityId, EmojiCatalog, MediaImage};
