//! 絵文字カタログ取得
//!
//! コミュニティごとの絵文字カタログ（HTML断片）を取得し、
//! `img[data-media-id]`要素だけを抜き出す。キャッシュは行わない。

use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use std::future::Future;

use super::errors::EmojiError;
use super::types::{CatalogDocument, CommunityId, MediaImage};
use crate::config::EmojiConfig;

/// カタログ内の絵文字画像要素
static MEDIA_IMAGE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("img[data-media-id]").expect("Failed to compile media image selector")
});

/// カタログ取得の抽象
///
/// 呼び出し1回につきリクエスト1回。重複呼び出しの抑止はキャッシュ側の責務。
pub trait CatalogFetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        community: &CommunityId,
    ) -> impl Future<Output = Result<CatalogDocument, EmojiError>> + Send;
}

/// HTTP経由のカタログ取得クライアント
#[derive(Debug, Clone)]
pub struct HttpCatalogFetcher {
    client: Client,
    catalog_url: String,
}

impl HttpCatalogFetcher {
    /// 新しいクライアントを作成
    ///
    /// # Errors
    /// HTTPクライアントのビルドに失敗した場合にエラーを返す
    pub fn new(config: &EmojiConfig) -> Result<Self, EmojiError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| EmojiError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            catalog_url: config.catalog_url.clone(),
        })
    }
}

impl CatalogFetcher for HttpCatalogFetcher {
    async fn fetch(&self, community: &CommunityId) -> Result<CatalogDocument, EmojiError> {
        log::debug!("Fetching emoji catalog for community: {}", community);

        let response = self
            .client
            .get(&self.catalog_url)
            .query(&[("subredditName", community.as_str())])
            .send()
            .await
            .map_err(|e| {
                let err = EmojiError::from_transport(e);
                log::warn!("Emoji catalog request failed for {}: {}", community, err);
                err
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            log::error!("Emoji catalog API error: {} - {}", status, community);
            return Err(EmojiError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        // 相対パスのsrcを解決するためにリダイレクト後の最終URLを使う
        let base = response.url().clone();

        let body = response
            .text()
            .await
            .map_err(|e| EmojiError::ParseError(format!("Catalog body decode error: {}", e)))?;

        let document = parse_catalog_document(&body, Some(&base));
        log::debug!(
            "Parsed emoji catalog for {}: {} image(s)",
            community,
            document.images.len()
        );
        Ok(document)
    }
}

/// カタログHTMLから`img[data-media-id]`要素を抜き出す
///
/// 想定外のマークアップは無視する。`src`が無い、または解決できない要素もスキップ。
pub fn parse_catalog_document(html: &str, base: Option<&Url>) -> CatalogDocument {
    let document = Html::parse_document(html);

    let images = document
        .select(&MEDIA_IMAGE_SELECTOR)
        .filter_map(|el| {
            let media_id = el.value().attr("data-media-id")?;
            let src = el.value().attr("src")?.trim();
            if src.is_empty() {
                return None;
            }
            let src = resolve_src(src, base)?;
            Some(MediaImage {
                media_id: media_id.to_string(),
                src,
            })
        })
        .collect();

    CatalogDocument { images }
}

/// 画像URLを解決（ブラウザの`img.src`相当）
fn resolve_src(src: &str, base: Option<&Url>) -> Option<String> {
    match base {
        Some(base) => match base.join(src) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                log::debug!("Skipping unresolvable image src '{}': {}", src, e);
                None
            }
        },
        None => Some(src.to_string()),
    }
}

/// テスト用のカタログ取得モック
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// コミュニティごとの応答と呼び出し回数を持つモック
    #[derive(Debug, Default)]
    pub struct MockFetcher {
        responses: Mutex<HashMap<String, Result<CatalogDocument, EmojiError>>>,
        calls: Mutex<HashMap<String, usize>>,
        total: AtomicUsize,
        delay: Duration,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self {
                delay: Duration::from_millis(20),
                ..Self::default()
            }
        }

        /// `(絵文字ID, URL)`の組からカタログ応答を登録
        pub fn with_catalog(self, community: &str, emojis: &[(&str, &str)]) -> Self {
            let images = emojis
                .iter()
                .map(|(id, url)| MediaImage {
                    media_id: format!("emote|t5_{}|{}", community, id),
                    src: url.to_string(),
                })
                .collect();
            self.respond(community, Ok(CatalogDocument { images }))
        }

        pub fn with_error(self, community: &str, err: EmojiError) -> Self {
            self.respond(community, Err(err))
        }

        pub fn respond(self, community: &str, result: Result<CatalogDocument, EmojiError>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(community.to_string(), result);
            self
        }

        pub fn calls_for(&self, community: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .get(community)
                .copied()
                .unwrap_or(0)
        }

        pub fn total_calls(&self) -> usize {
            self.total.load(Ordering::SeqCst)
        }
    }

    impl CatalogFetcher for MockFetcher {
        async fn fetch(&self, community: &CommunityId) -> Result<CatalogDocument, EmojiError> {
            self.total.fetch_add(1, Ordering::SeqCst);
            *self
                .calls
                .lock()
                .unwrap()
                .entry(community.to_string())
                .or_default() += 1;

            // 並行呼び出しが合流できるように応答を遅らせる
            tokio::time::sleep(self.delay).await;

            let response = self.responses.lock().unwrap().get(community.as_str()).cloned();
            response.unwrap_or_else(|| Ok(CatalogDocument::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG_HTML: &str = r#"
        <html><body>
          <div class="emote-picker">
            <img data-media-id="emote|t5_2qh1i|5" src="https://x/e5.png">
            <img data-media-id="emote|t5_2qh1i|9" src="/static/e9.png">
            <img class="avatar" src="https://x/avatar.png">
            <img data-media-id="emote|t5_2qh1i|11">
            <span data-media-id="emote|t5_2qh1i|12">not an image</span>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_parse_catalog_document_selects_media_images() {
        let base = Url::parse("https://www.reddit.com/svc/shreddit/composer/emotes").unwrap();
        let doc = parse_catalog_document(CATALOG_HTML, Some(&base));

        assert_eq!(doc.images.len(), 2);
        assert_eq!(doc.images[0].media_id, "emote|t5_2qh1i|5");
        assert_eq!(doc.images[0].src, "https://x/e5.png");
        // 相対パスはベースURLで解決される
        assert_eq!(doc.images[1].src, "https://www.reddit.com/static/e9.png");
    }

    #[test]
    fn test_parse_catalog_document_without_base() {
        let doc = parse_catalog_document(CATALOG_HTML, None);
        assert_eq!(doc.images[1].src, "/static/e9.png");
    }

    #[test]
    fn test_parse_unrelated_markup() {
        let doc = parse_catalog_document("<p>No emotes here</p>", None);
        assert!(doc.images.is_empty());

        let doc = parse_catalog_document("{\"not\": \"html\"}", None);
        assert!(doc.images.is_empty());
    }

    fn config_for(server: &mockito::ServerGuard) -> EmojiConfig {
        EmojiConfig::default().with_catalog_url(format!("{}/svc/emotes", server.url()))
    }

    #[tokio::test]
    async fn test_http_fetch_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/svc/emotes")
            .match_query(mockito::Matcher::UrlEncoded(
                "subredditName".into(),
                "rust".into(),
            ))
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(CATALOG_HTML)
            .create_async()
            .await;

        let fetcher = HttpCatalogFetcher::new(&config_for(&server)).unwrap();
        let doc = fetcher.fetch(&CommunityId::from("rust")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(doc.images.len(), 2);
        assert_eq!(
            doc.images[1].src,
            format!("{}/static/e9.png", server.url())
        );

        let catalog = doc.into_catalog();
        assert_eq!(catalog.get("5"), Some("https://x/e5.png"));
    }

    #[tokio::test]
    async fn test_http_fetch_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/svc/emotes")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let fetcher = HttpCatalogFetcher::new(&config_for(&server)).unwrap();
        let result = fetcher.fetch(&CommunityId::from("rust")).await;

        assert_eq!(
            result,
            Err(EmojiError::ApiError {
                status: 503,
                message: "unavailable".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_http_fetch_connection_refused() {
        // 未使用ポートへの接続はネットワークエラー
        let config = EmojiConfig::default().with_catalog_url("http://127.0.0.1:1/svc/emotes");
        let fetcher = HttpCatalogFetcher::new(&config).unwrap();
        let result = fetcher.fetch(&CommunityId::from("rust")).await;
        assert!(matches!(result, Err(EmojiError::NetworkError(_))));
    }
}
