use thiserror::Error;

/// 絵文字カタログ取得エラー
///
/// 単一フライトで複数の待機者に同じ結果を配るため`Clone`を実装する。
/// そのため`reqwest::Error`は保持せず文字列に変換して持つ。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmojiError {
    #[error("HTTP request failed: {0}")]
    NetworkError(String),

    #[error("Request timeout: catalog endpoint did not respond")]
    Timeout,

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl EmojiError {
    /// reqwestのエラーを分類して変換
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EmojiError::Timeout
        } else {
            EmojiError::NetworkError(err.to_string())
        }
    }
}

impl From<EmojiError> for String {
    fn from(err: EmojiError) -> String {
        err.to_string()
    }
}
