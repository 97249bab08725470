// =============================================================================
// 絵文字カタログキャッシュ
// =============================================================================
// コミュニティごとの絵文字カタログをページの寿命の間キャッシュする
//
// - 「絵文字なし」も結果としてキャッシュする（ネガティブキャッシュ）
// - 同じコミュニティへの同時リクエストは1回の取得に合流させる（シングルフライト）
// - 取得失敗はキャッシュしない（次回の呼び出しで再取得）
// =============================================================================

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::errors::EmojiError;
use super::fetcher::CatalogFetcher;
use super::types::{CommunityId, EmojiCatalog};

/// 解決結果（`None`は「絵文字なし」が確定したことを表す）
pub type Resolution = Result<Option<Arc<EmojiCatalog>>, EmojiError>;

/// 取得中の解決処理。後から来た呼び出し元はこれをcloneして待つ
type SharedResolution = Shared<BoxFuture<'static, Resolution>>;

type EntryMap = HashMap<CommunityId, CacheEntry>;

/// キャッシュエントリ
///
/// エントリが無い状態が「未解決」。InFlight -> Resolved の一方向にのみ遷移する。
enum CacheEntry {
    /// 取得中（コミュニティごとに高々1つ）
    InFlight(SharedResolution),
    /// 解決済み（以後変更されない）
    Resolved(Option<Arc<EmojiCatalog>>),
}

/// コミュニティ単位の絵文字カタログキャッシュ
pub struct EmojiCatalogCache<F: CatalogFetcher> {
    fetcher: Arc<F>,
    entries: Arc<Mutex<EntryMap>>,
}

impl<F: CatalogFetcher> EmojiCatalogCache<F> {
    /// 新しいキャッシュを作成
    pub fn new(fetcher: F) -> Self {
        Self::with_shared_fetcher(Arc::new(fetcher))
    }

    /// 呼び出し側と共有するfetcherでキャッシュを作成
    pub fn with_shared_fetcher(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// コミュニティの絵文字カタログを解決
    ///
    /// 1. 解決済みならそのまま返す
    /// 2. 取得中なら同じ取得結果を待つ
    /// 3. どちらでもなければ取得中として登録してから取得を開始する
    ///
    /// 2と3の判定・登録は1回のロック内で行い、途中で中断点を挟まない
    pub async fn resolve(&self, community: &CommunityId) -> Resolution {
        let resolution = {
            let mut entries = lock(&self.entries);
            match entries.get(community) {
                Some(CacheEntry::Resolved(catalog)) => {
                    log::debug!("Emoji cache hit for community: {}", community);
                    return Ok(catalog.clone());
                }
                Some(CacheEntry::InFlight(pending)) => {
                    log::debug!("Joining in-flight emoji resolution for: {}", community);
                    pending.clone()
                }
                None => {
                    log::debug!("Emoji cache miss, starting resolution for: {}", community);
                    let pending = self.start_resolution(community);
                    entries.insert(community.clone(), CacheEntry::InFlight(pending.clone()));
                    pending
                }
            }
        };

        resolution.await
    }

    /// 解決済みエントリを中断なしで参照
    ///
    /// 未解決・取得中の場合は`None`、解決済みなら`Some(結果)`を返す
    pub fn cached(&self, community: &CommunityId) -> Option<Option<Arc<EmojiCatalog>>> {
        match lock(&self.entries).get(community) {
            Some(CacheEntry::Resolved(catalog)) => Some(catalog.clone()),
            _ => None,
        }
    }

    /// 取得中かどうか
    pub fn is_in_flight(&self, community: &CommunityId) -> bool {
        matches!(
            lock(&self.entries).get(community),
            Some(CacheEntry::InFlight(_))
        )
    }

    /// 解決済みのコミュニティ数
    pub fn resolved_count(&self) -> usize {
        lock(&self.entries)
            .values()
            .filter(|entry| matches!(entry, CacheEntry::Resolved(_)))
            .count()
    }

    /// 取得処理を組み立てる（ポーリングされるまで何もしない）
    fn start_resolution(&self, community: &CommunityId) -> SharedResolution {
        let fetcher = Arc::clone(&self.fetcher);
        // マップ自身が取得処理を保持するため、循環参照を避けてWeakで持つ
        let entries = Arc::downgrade(&self.entries);
        let community = community.clone();

        async move {
            let fetched = fetcher.fetch(&community).await;

            // 中断中に別の解決が完了していればそれを使う（二重パース・二重書き込みを避ける）
            if let Some(resolved) = peek_resolved(&entries, &community) {
                log::debug!("Emoji catalog for {} resolved concurrently", community);
                return Ok(resolved);
            }

            let outcome = fetched.map(|document| {
                let catalog = document.into_catalog();
                if catalog.is_empty() {
                    log::info!("Community {} has no emoji, caching negative result", community);
                    None
                } else {
                    log::info!(
                        "Resolved {} emoji(s) for community: {}",
                        catalog.len(),
                        community
                    );
                    Some(Arc::new(catalog))
                }
            });

            if let Some(entries) = entries.upgrade() {
                let mut entries = lock(&entries);
                match &outcome {
                    Ok(resolved) => {
                        entries.insert(community, CacheEntry::Resolved(resolved.clone()));
                    }
                    Err(e) => {
                        // 失敗はキャッシュしない（次回の呼び出しで再取得）
                        log::warn!("Emoji catalog resolution failed for {}: {}", community, e);
                        entries.remove(&community);
                    }
                }
            }

            outcome
        }
        .boxed()
        .shared()
    }
}

impl<F: CatalogFetcher> std::fmt::Debug for EmojiCatalogCache<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmojiCatalogCache")
            .field("resolved", &self.resolved_count())
            .finish()
    }
}

fn lock(entries: &Mutex<EntryMap>) -> MutexGuard<'_, EntryMap> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

fn peek_resolved(
    entries: &Weak<Mutex<EntryMap>>,
    community: &CommunityId,
) -> Option<Option<Arc<EmojiCatalog>>> {
    let entries = entries.upgrade()?;
    let entries = lock(&entries);
    match entries.get(community) {
        Some(CacheEntry::Resolved(catalog)) => Some(catalog.clone()),
        _ => None,
    }
}
