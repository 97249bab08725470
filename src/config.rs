// =============================================================================
// 共通設定・定数モジュール
// =============================================================================
// 絵文字カタログ取得・置換処理で使用する設定値・定数を定義
// =============================================================================

use std::time::Duration;

/// HTTPリクエストのデフォルトタイムアウト（秒）
///
/// 絵文字カタログ取得リクエストで使用。
/// ネットワーク状況が悪い場合でも適切にタイムアウトし、
/// コメント処理が長時間止まらないようにする。
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// 絵文字カタログ取得エンドポイントのデフォルトURL
pub const DEFAULT_CATALOG_URL: &str = "https://www.reddit.com/svc/shreddit/composer/emotes";

/// 挿入する絵文字画像の表示サイズ（px）
pub const DEFAULT_EMOJI_SIZE_PX: u32 = 20;

/// 挿入する絵文字画像に付与するCSSクラス
pub const EMOJI_IMG_CLASS: &str = "comment-emoji";

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// HTTPリクエストのデフォルトタイムアウト（Duration）
///
/// HTTPクライアント構築時に直接使用可能
pub fn http_timeout() -> Duration {
    Duration::from_secs(HTTP_TIMEOUT_SECS)
}

/// 絵文字処理の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiConfig {
    /// カタログ取得URL（`subredditName`クエリが付与される）
    pub catalog_url: String,
    /// 画像の幅・高さ（px）
    pub emoji_size_px: u32,
    /// HTTPタイムアウト
    pub http_timeout: Duration,
    /// HTTPクライアントのUser-Agent
    pub user_agent: String,
}

impl EmojiConfig {
    /// 環境変数で上書きした設定を作成
    ///
    /// - `EMOJI_CATALOG_URL`
    /// - `EMOJI_SIZE_PX`
    /// - `EMOJI_HTTP_TIMEOUT_SECS`
    ///
    /// 値が不正な場合は警告を出してデフォルト値を使う
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("EMOJI_CATALOG_URL") {
            if !url.trim().is_empty() {
                config.catalog_url = url;
            }
        }

        if let Ok(size) = std::env::var("EMOJI_SIZE_PX") {
            match size.parse::<u32>() {
                Ok(px) if px > 0 => config.emoji_size_px = px,
                _ => log::warn!("Ignoring invalid EMOJI_SIZE_PX: {}", size),
            }
        }

        if let Ok(secs) = std::env::var("EMOJI_HTTP_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) if s > 0 => config.http_timeout = Duration::from_secs(s),
                _ => log::warn!("Ignoring invalid EMOJI_HTTP_TIMEOUT_SECS: {}", secs),
            }
        }

        config
    }

    /// カタログURLを差し替える（テスト・ミラー用）
    pub fn with_catalog_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_url = url.into();
        self
    }

    /// 画像サイズを差し替える
    pub fn with_emoji_size(mut self, px: u32) -> Self {
        self.emoji_size_px = px;
        self
    }
}

impl Default for EmojiConfig {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            emoji_size_px: DEFAULT_EMOJI_SIZE_PX,
            http_timeout: http_timeout(),
            user_agent: USER_AGENT.to_string(),
        }
    }
}
