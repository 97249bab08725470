// =============================================================================
// コメント処理
// =============================================================================
// コメントごとに 本文取得 -> プレースホルダー有無チェック -> カタログ解決
// -> 置換 -> 変化があれば書き戻し を行う
//
// 異なるコメントは並行に処理する。1件の失敗はバッチ内の他のコメントや
// 後続のバッチに影響させない。
// =============================================================================

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::emoji::{contains_placeholder, CatalogFetcher, EmojiCatalogCache, EmojiError, TextRewriter};
use crate::page::{CommentHandle, CommentSource};

/// バッチ処理結果（ログ・CLI出力用）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// 処理対象のコメント数
    pub comments_seen: usize,
    /// 本文を書き換えたコメント数
    pub comments_rewritten: usize,
    /// 置換した絵文字の総数
    pub replacements: usize,
    /// 本文要素が見つからなかったコメント数
    pub missing_bodies: usize,
    /// カタログ解決に失敗したコメント数
    pub failures: usize,
    /// 処理時間（ミリ秒）
    pub elapsed_ms: u64,
}

/// スキップ理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    /// 本文要素が無い（削除・折りたたみ）
    MissingBody,
    /// プレースホルダーを含まない
    NoPlaceholder,
    /// コミュニティが特定できない
    NoCommunity,
    /// コミュニティに絵文字が無い
    NoEmoji,
}

/// 1コメント分の処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
enum CommentOutcome {
    Skipped(SkipReason),
    /// 置換対象のIDがカタログに無く、書き戻し不要
    Unchanged,
    Rewritten { replacements: usize },
    Failed(EmojiError),
}

/// コメント処理オーケストレーター
pub struct CommentProcessor<F: CatalogFetcher> {
    source: Arc<dyn CommentSource>,
    cache: Arc<EmojiCatalogCache<F>>,
    rewriter: TextRewriter,
}

impl<F: CatalogFetcher> CommentProcessor<F> {
    pub fn new(
        source: Arc<dyn CommentSource>,
        cache: Arc<EmojiCatalogCache<F>>,
        rewriter: TextRewriter,
    ) -> Self {
        Self {
            source,
            cache,
            rewriter,
        }
    }

    pub fn source(&self) -> &Arc<dyn CommentSource> {
        &self.source
    }

    /// ページ上の既存コメントをすべて処理（初回スキャン）
    pub async fn process_page(&self) -> ProcessReport {
        let comments = self.source.list_comments();
        log::debug!(
            "Initial scan found {} comment(s) on {} layout",
            comments.len(),
            self.source.name()
        );
        self.process(&comments).await
    }

    /// コメントのバッチを処理
    ///
    /// エラーは返さない。失敗はログに出してレポートに数える。
    pub async fn process(&self, comments: &[CommentHandle]) -> ProcessReport {
        let started = Instant::now();
        let mut report = ProcessReport {
            comments_seen: comments.len(),
            ..ProcessReport::default()
        };

        if comments.is_empty() {
            return report;
        }

        let pending: Vec<_> = comments
            .iter()
            .map(|comment| self.process_comment(comment))
            .collect();
        let outcomes = join_all(pending).await;

        for outcome in outcomes {
            match outcome {
                CommentOutcome::Rewritten { replacements } => {
                    report.comments_rewritten += 1;
                    report.replacements += replacements;
                }
                CommentOutcome::Skipped(SkipReason::MissingBody) => report.missing_bodies += 1,
                CommentOutcome::Failed(_) => report.failures += 1,
                CommentOutcome::Skipped(_) | CommentOutcome::Unchanged => {}
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        if report.replacements > 0 || report.failures > 0 {
            log::info!(
                "Replaced {} emoji in {} comment(s) ({} failed) in {}ms",
                report.replacements,
                report.comments_rewritten,
                report.failures,
                report.elapsed_ms
            );
        } else {
            log::debug!(
                "Processed {} comment(s) without changes in {}ms",
                report.comments_seen,
                report.elapsed_ms
            );
        }
        report
    }

    /// 1コメントを処理
    async fn process_comment(&self, comment: &CommentHandle) -> CommentOutcome {
        let Some(body) = self.source.body_element(comment) else {
            log::debug!("Comment {:?} has no body element, skipping", comment.node);
            return CommentOutcome::Skipped(SkipReason::MissingBody);
        };
        let Some(original) = self.source.read_body(body) else {
            return CommentOutcome::Skipped(SkipReason::MissingBody);
        };

        // カタログ解決前の軽量チェック
        if !contains_placeholder(&original) {
            return CommentOutcome::Skipped(SkipReason::NoPlaceholder);
        }

        let Some(community) = self.source.community_id(comment) else {
            log::debug!("Comment {:?} has no community, skipping", comment.node);
            return CommentOutcome::Skipped(SkipReason::NoCommunity);
        };

        let catalog = match self.cache.resolve(&community).await {
            Ok(Some(catalog)) => catalog,
            // 絵文字なしはこのコメントだけスキップ（バッチは続行）
            Ok(None) => return CommentOutcome::Skipped(SkipReason::NoEmoji),
            Err(e) => {
                log::warn!(
                    "Failed to resolve emoji catalog for {} (comment {:?}): {}",
                    community,
                    comment.node,
                    e
                );
                return CommentOutcome::Failed(e);
            }
        };

        // 待機中に本文が書き換えられている可能性があるため読み直す
        let current = self.source.read_body(body).unwrap_or(original);
        let outcome = self.rewriter.rewrite_counted(&current, &catalog);

        // 内容が変わった場合のみ書き戻す
        if outcome.body.as_ref() == current.as_str() {
            return CommentOutcome::Unchanged;
        }

        let replacements = outcome.replacements;
        let rewritten = outcome.body.into_owned();
        if !self.source.write_body(body, rewritten) {
            return CommentOutcome::Skipped(SkipReason::MissingBody);
        }
        CommentOutcome::Rewritten { replacements }
    }
}
