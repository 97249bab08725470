use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// コミュニティ（subreddit）識別子
///
/// 大文字小文字などの正規化はリモート側に任せ、ここでは不透明なキーとして扱う
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CommunityId(String);

impl CommunityId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommunityId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CommunityId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// カタログ内の画像要素1件分（`img[data-media-id]`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaImage {
    /// `data-media-id`属性の値（例: `emote|t5_2qh1i|12345`）
    pub media_id: String,
    /// 解決済みの画像URL
    pub src: String,
}

impl MediaImage {
    /// `|`区切りの3番目のフィールドを絵文字IDとして取り出す
    pub fn emoji_id(&self) -> Option<&str> {
        self.media_id
            .split('|')
            .nth(2)
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// 取得・パース済みのカタログドキュメント
///
/// HTMLパース結果はSendではないため、フェッチ時点で必要な要素だけを抜き出して保持する
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogDocument {
    pub images: Vec<MediaImage>,
}

impl CatalogDocument {
    /// 絵文字ID -> URL のマッピングに変換
    ///
    /// IDが取り出せない要素は黙ってスキップする。IDが重複した場合は先勝ち。
    pub fn into_catalog(self) -> EmojiCatalog {
        let mut emojis = HashMap::with_capacity(self.images.len());
        for image in self.images {
            let Some(id) = image.emoji_id() else {
                log::debug!("Skipping catalog entry without emoji id: {}", image.media_id);
                continue;
            };
            let id = id.to_string();
            emojis.entry(id).or_insert(image.src);
        }
        EmojiCatalog { emojis }
    }
}

/// 1コミュニティ分の絵文字カタログ（絵文字ID -> 画像URL）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmojiCatalog {
    emojis: HashMap<String, String>,
}

impl EmojiCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 絵文字IDに対応する画像URLを取得
    pub fn get(&self, emoji_id: &str) -> Option<&str> {
        self.emojis.get(emoji_id).map(String::as_str)
    }

    pub fn contains(&self, emoji_id: &str) -> bool {
        self.emojis.contains_key(emoji_id)
    }

    pub fn len(&self) -> usize {
        self.emojis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emojis.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for EmojiCatalog
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            emojis: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(media_id: &str, src: &str) -> MediaImage {
        MediaImage {
            media_id: media_id.to_string(),
            src: src.to_string(),
        }
    }

    #[test]
    fn test_emoji_id_third_field() {
        assert_eq!(image("emote|t5_abc|12345", "x").emoji_id(), Some("12345"));
        assert_eq!(image("emote|t5_abc|9|extra", "x").emoji_id(), Some("9"));
    }

    #[test]
    fn test_emoji_id_missing_field() {
        assert_eq!(image("emote|t5_abc", "x").emoji_id(), None);
        assert_eq!(image("emote|t5_abc|", "x").emoji_id(), None);
        assert_eq!(image("", "x").emoji_id(), None);
    }

    #[test]
    fn test_into_catalog_skips_malformed_and_keeps_first() {
        let doc = CatalogDocument {
            images: vec![
                image("emote|t5_abc|5", "https://x/e5.png"),
                image("broken", "https://x/broken.png"),
                image("emote|t5_abc|5", "https://x/dup.png"),
                image("emote|t5_abc|7", "https://x/e7.png"),
            ],
        };

        let catalog = doc.into_catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("5"), Some("https://x/e5.png"));
        assert_eq!(catalog.get("7"), Some("https://x/e7.png"));
        assert!(!catalog.contains("broken"));
    }

    #[test]
    fn test_empty_document_gives_empty_catalog() {
        assert!(CatalogDocument::default().into_catalog().is_empty());
    }

    #[test]
    fn test_community_id_is_opaque() {
        let a = CommunityId::from("Rust");
        let b = CommunityId::from("rust");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "Rust");
    }
}
