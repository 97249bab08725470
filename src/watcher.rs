// =============================================================================
// ページ変更監視モジュール
// =============================================================================
// 追加ノードのバッチを受け取り、新しいコメントだけを抽出して処理する
// （後から読み込まれたコメントやSPA遷移に対応）
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::emoji::CatalogFetcher;
use crate::page::MutationBatch;
use crate::processor::CommentProcessor;

/// ページ変更監視タスク
///
/// `start()`で購読を開始し、`stop()`またはチャネルが閉じるまで動き続ける。
/// バッチ処理中のエラーはログに出すだけでループは止めない。
pub struct ChangeWatcher {
    /// 実行中フラグ
    is_running: Arc<AtomicBool>,
    /// 停止通知
    stop_signal: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl ChangeWatcher {
    /// 監視タスクを開始する
    ///
    /// # Arguments
    /// * `processor` - コメント処理
    /// * `batches` - 追加ノードのバッチ（`Document::subscribe()`で取得）
    pub fn start<F: CatalogFetcher>(
        processor: Arc<CommentProcessor<F>>,
        batches: mpsc::UnboundedReceiver<MutationBatch>,
    ) -> Self {
        let is_running = Arc::new(AtomicBool::new(true));
        let stop_signal = Arc::new(Notify::new());

        let is_running_clone = Arc::clone(&is_running);
        let stop_signal_clone = Arc::clone(&stop_signal);

        let handle = tokio::spawn(async move {
            Self::watch_loop(processor, batches, is_running_clone, stop_signal_clone).await;
        });

        log::info!("Change watcher started");

        Self {
            is_running,
            stop_signal,
            handle: Some(handle),
        }
    }

    /// 監視ループ
    async fn watch_loop<F: CatalogFetcher>(
        processor: Arc<CommentProcessor<F>>,
        mut batches: mpsc::UnboundedReceiver<MutationBatch>,
        is_running: Arc<AtomicBool>,
        stop_signal: Arc<Notify>,
    ) {
        while is_running.load(Ordering::SeqCst) {
            let batch = tokio::select! {
                batch = batches.recv() => batch,
                _ = stop_signal.notified() => {
                    log::debug!("Change watcher received stop signal");
                    continue;
                }
            };

            let Some(batch) = batch else {
                log::debug!("Mutation channel closed");
                break;
            };

            Self::handle_batch(&processor, batch).await;
        }

        is_running.store(false, Ordering::SeqCst);
        log::info!("Change watcher stopped");
    }

    /// 1バッチ分の処理（新しいコメントが無ければ何もしない）
    async fn handle_batch<F: CatalogFetcher>(processor: &CommentProcessor<F>, batch: MutationBatch) {
        let comments = processor.source().classify_added(&batch.added_nodes);
        if comments.is_empty() {
            return;
        }

        log::debug!(
            "Mutation batch: {} added node(s), {} new comment(s)",
            batch.added_nodes.len(),
            comments.len()
        );

        let report = processor.process(&comments).await;
        if report.failures > 0 {
            log::warn!(
                "{} comment(s) in mutation batch could not be processed",
                report.failures
            );
        }
    }

    /// 監視を停止する
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        // ループをすぐに終了させるために通知を送る
        self.stop_signal.notify_one();
    }

    /// 実行中かどうかを確認
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// 停止してタスクの終了を待つ
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::error!("Change watcher task failed: {}", e);
            }
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
