//! ページレイアウトごとのコメント取得アダプター
//!
//! 旧レイアウト（old.reddit.com）と新レイアウト（shreddit）で
//! コメント要素・本文要素・コミュニティ名の探し方が異なるため、
//! `CommentSource`トレイトで共通化する。

use std::collections::HashSet;
use std::sync::Arc;

use super::{Document, NodeId};
use crate::emoji::CommunityId;

/// コメント要素への参照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommentHandle {
    pub node: NodeId,
}

/// レイアウトごとのコメント取得インターフェース
pub trait CommentSource: Send + Sync {
    /// レイアウト名（ログ用）
    fn name(&self) -> &'static str;

    fn document(&self) -> &Arc<Document>;

    /// ページ上の全コメント
    fn list_comments(&self) -> Vec<CommentHandle>;

    /// コメント本文の要素。削除・折りたたみ等で無い場合は`None`
    fn body_element(&self, comment: &CommentHandle) -> Option<NodeId>;

    /// コメントが属するコミュニティ
    fn community_id(&self, comment: &CommentHandle) -> Option<CommunityId>;

    /// 追加ノードのうち新しいコメントを表すもの（内側のコメントも含む）
    fn classify_added(&self, added: &[NodeId]) -> Vec<CommentHandle>;

    fn read_body(&self, body: NodeId) -> Option<String> {
        self.document().inner_html(body)
    }

    fn write_body(&self, body: NodeId, html: String) -> bool {
        self.document().set_inner_html(body, html)
    }
}

/// ページのレイアウトを判定してアダプターを返す
///
/// `shreddit-app`要素があれば新レイアウト、無ければ旧レイアウト
pub fn detect_layout(document: Arc<Document>) -> Arc<dyn CommentSource> {
    let is_new = document
        .root()
        .map(|root| {
            !document
                .find_all(root, |d, n| {
                    d.tag(n).as_deref() == Some("shreddit-app")
                })
                .is_empty()
        })
        .unwrap_or(false);

    if is_new {
        log::info!("Detected page layout: new");
        Arc::new(NewRedditLayout::new(document))
    } else {
        log::info!("Detected page layout: old");
        Arc::new(OldRedditLayout::new(document))
    }
}

/// 追加ノードとその内側から条件に合う要素を重複なく集める
fn collect_added<P>(document: &Document, added: &[NodeId], is_comment: P) -> Vec<CommentHandle>
where
    P: Fn(&Document, NodeId) -> bool,
{
    let mut seen = HashSet::new();
    added
        .iter()
        .flat_map(|&node| document.find_all(node, &is_comment))
        .filter(|node| seen.insert(*node))
        .map(|node| CommentHandle { node })
        .collect()
}

/// `/r/<name>/...`形式のパスまたはURLからコミュニティ名を取り出す
fn community_from_permalink(permalink: &str) -> Option<CommunityId> {
    let mut parts = permalink.split('/').filter(|p| !p.is_empty());
    while let Some(part) = parts.next() {
        if part == "r" {
            return parts.next().map(CommunityId::from);
        }
    }
    None
}

// =============================================================================
// 旧レイアウト
// =============================================================================

/// old.reddit.com のレイアウト
///
/// - コメント: `.commentarea`内の`.comment`
/// - 本文: `.usertext-body .md`
/// - コミュニティ: `data-subreddit`属性
pub struct OldRedditLayout {
    document: Arc<Document>,
}

impl OldRedditLayout {
    pub fn new(document: Arc<Document>) -> Self {
        Self { document }
    }

    fn is_comment(document: &Document, node: NodeId) -> bool {
        document.has_class(node, "comment")
    }

    fn in_comment_area(&self, node: NodeId) -> bool {
        let mut current = self.document.parent(node);
        while let Some(id) = current {
            if self.document.has_class(id, "commentarea") {
                return true;
            }
            current = self.document.parent(id);
        }
        false
    }
}

impl CommentSource for OldRedditLayout {
    fn name(&self) -> &'static str {
        "old"
    }

    fn document(&self) -> &Arc<Document> {
        &self.document
    }

    fn list_comments(&self) -> Vec<CommentHandle> {
        let Some(root) = self.document.root() else {
            return Vec::new();
        };
        self.document
            .find_all(root, Self::is_comment)
            .into_iter()
            .filter(|node| self.in_comment_area(*node))
            .map(|node| CommentHandle { node })
            .collect()
    }

    fn body_element(&self, comment: &CommentHandle) -> Option<NodeId> {
        if !self.document.is_attached(comment.node) {
            return None;
        }
        // 返信コメントの本文を拾わないように、内側の.commentには降りない
        self.document
            .find_within(
                comment.node,
                |d, n| d.has_class(n, "usertext-body"),
                Self::is_comment,
            )
            .into_iter()
            .find_map(|usertext| {
                self.document
                    .find_within(usertext, |d, n| d.has_class(n, "md"), Self::is_comment)
                    .into_iter()
                    .next()
            })
    }

    fn community_id(&self, comment: &CommentHandle) -> Option<CommunityId> {
        let mut current = Some(comment.node);
        while let Some(id) = current {
            if let Some(name) = self.document.attr(id, "data-subreddit") {
                if !name.is_empty() {
                    return Some(CommunityId::from(name));
                }
            }
            current = self.document.parent(id);
        }
        None
    }

    fn classify_added(&self, added: &[NodeId]) -> Vec<CommentHandle> {
        collect_added(&self.document, added, Self::is_comment)
            .into_iter()
            .filter(|comment| self.in_comment_area(comment.node))
            .collect()
    }
}

// =============================================================================
// 新レイアウト
// =============================================================================

/// www.reddit.com（shreddit）のレイアウト
///
/// - コメント: `shreddit-comment`
/// - 本文: `[slot="comment"]`
/// - コミュニティ: `permalink`属性、無ければ`shreddit-post[subreddit-name]`
pub struct NewRedditLayout {
    document: Arc<Document>,
}

impl NewRedditLayout {
    pub fn new(document: Arc<Document>) -> Self {
        Self { document }
    }

    fn is_comment(document: &Document, node: NodeId) -> bool {
        document.tag(node).as_deref() == Some("shreddit-comment")
    }

    fn page_community(&self) -> Option<CommunityId> {
        let root = self.document.root()?;
        self.document
            .find_all(root, |d, n| d.tag(n).as_deref() == Some("shreddit-post"))
            .into_iter()
            .find_map(|post| self.document.attr(post, "subreddit-name"))
            .filter(|name| !name.is_empty())
            .map(CommunityId::from)
    }
}

impl CommentSource for NewRedditLayout {
    fn name(&self) -> &'static str {
        "new"
    }

    fn document(&self) -> &Arc<Document> {
        &self.document
    }

    fn list_comments(&self) -> Vec<CommentHandle> {
        let Some(root) = self.document.root() else {
            return Vec::new();
        };
        self.document
            .find_all(root, Self::is_comment)
            .into_iter()
            .map(|node| CommentHandle { node })
            .collect()
    }

    fn body_element(&self, comment: &CommentHandle) -> Option<NodeId> {
        if !self.document.is_attached(comment.node) {
            return None;
        }
        self.document
            .find_within(
                comment.node,
                |d, n| d.attr(n, "slot").as_deref() == Some("comment"),
                Self::is_comment,
            )
            .into_iter()
            .next()
    }

    fn community_id(&self, comment: &CommentHandle) -> Option<CommunityId> {
        self.document
            .attr(comment.node, "permalink")
            .and_then(|permalink| community_from_permalink(&permalink))
            .or_else(|| self.page_community())
    }

    fn classify_added(&self, added: &[NodeId]) -> Vec<CommentHandle> {
        collect_added(&self.document, added, Self::is_comment)
    }
}
