// =============================================================================
// ページモデル
// =============================================================================
// ブラウザDOMの代わりとなるインメモリのページ表現
//
// - HTMLから要素ツリーを構築（scraper）
// - 要素ごとの内部HTMLの読み書き
// - 要素追加時に追加ノードのバッチを購読者へ通知（MutationObserver相当）
//
// 内部HTMLは要素ごとに独立して保持する。子要素を書き換えても
// 祖先要素の内部HTMLには反映されない。
// =============================================================================

pub mod layout;

pub use layout::{detect_layout, CommentHandle, CommentSource, NewRedditLayout, OldRedditLayout};

use scraper::{ElementRef, Html};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;

/// 要素ID（ドキュメント内で一意）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// 追加されたノードのバッチ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub added_nodes: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
    classes: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    inner_html: String,
    detached: bool,
}

/// インメモリのページ
#[derive(Debug, Default)]
pub struct Document {
    nodes: RwLock<Vec<Element>>,
    observers: Mutex<Vec<mpsc::UnboundedSender<MutationBatch>>>,
}

impl Document {
    /// HTMLドキュメントからページを構築
    pub fn parse(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let document = Self::default();
        {
            let mut nodes = document.write();
            add_element(&mut nodes, parsed.root_element(), None);
        }
        log::debug!("Parsed page with {} element(s)", document.len());
        document
    }

    /// ルート要素（`<html>`）
    pub fn root(&self) -> Option<NodeId> {
        if self.read().is_empty() {
            None
        } else {
            Some(NodeId(0))
        }
    }

    /// 要素数（切り離された要素も含む）
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// 追加ノードの通知を購読
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MutationBatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// HTML断片を`parent`の末尾に追加し、追加されたトップレベル要素を返す
    ///
    /// 購読者には追加ノードのバッチが通知される
    pub fn append_html(&self, parent: NodeId, html: &str) -> Vec<NodeId> {
        let fragment = Html::parse_fragment(html);
        let added: Vec<NodeId> = {
            let mut nodes = self.write();
            if parent.0 >= nodes.len() {
                log::warn!("append_html: unknown parent {:?}", parent);
                return Vec::new();
            }
            let added: Vec<NodeId> = fragment
                .root_element()
                .children()
                .filter_map(ElementRef::wrap)
                .map(|el| add_element(&mut nodes, el, Some(parent)))
                .collect();
            nodes[parent.0].inner_html.push_str(html);
            added
        };

        if !added.is_empty() {
            self.notify(MutationBatch {
                added_nodes: added.clone(),
            });
        }
        added
    }

    /// 要素をツリーから切り離す（削除されたコメントなど）
    pub fn detach(&self, id: NodeId) {
        let mut nodes = self.write();
        let Some(parent) = nodes.get(id.0).and_then(|el| el.parent) else {
            return;
        };
        nodes[parent.0].children.retain(|child| *child != id);
        nodes[id.0].parent = None;
        nodes[id.0].detached = true;
    }

    pub fn tag(&self, id: NodeId) -> Option<String> {
        self.read().get(id.0).map(|el| el.tag.clone())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<String> {
        self.read().get(id.0).and_then(|el| {
            el.attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        })
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.read()
            .get(id.0)
            .is_some_and(|el| el.classes.iter().any(|c| c == class))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.read().get(id.0).and_then(|el| el.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.read()
            .get(id.0)
            .map(|el| el.children.clone())
            .unwrap_or_default()
    }

    /// ツリーに接続されているか
    pub fn is_attached(&self, id: NodeId) -> bool {
        let nodes = self.read();
        let mut current = id;
        loop {
            match nodes.get(current.0) {
                Some(el) if el.detached => return false,
                Some(el) => match el.parent {
                    Some(parent) => current = parent,
                    None => return true,
                },
                None => return false,
            }
        }
    }

    /// 要素の内部HTML
    pub fn inner_html(&self, id: NodeId) -> Option<String> {
        self.read().get(id.0).map(|el| el.inner_html.clone())
    }

    /// 内部HTMLを置き換える（子要素ツリーは再構築しない）
    pub fn set_inner_html(&self, id: NodeId, html: String) -> bool {
        match self.write().get_mut(id.0) {
            Some(el) => {
                el.inner_html = html;
                true
            }
            None => false,
        }
    }

    /// 条件に合う要素を文書順に列挙（`root`自身を含む）
    pub fn find_all<P>(&self, root: NodeId, pred: P) -> Vec<NodeId>
    where
        P: Fn(&Document, NodeId) -> bool,
    {
        self.find_within(root, pred, |_, _| false)
    }

    /// 条件に合う要素を文書順に列挙
    ///
    /// `stop`に合う要素（`root`以外）の内側には降りない
    pub fn find_within<P, S>(&self, root: NodeId, pred: P, stop: S) -> Vec<NodeId>
    where
        P: Fn(&Document, NodeId) -> bool,
        S: Fn(&Document, NodeId) -> bool,
    {
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if pred(self, id) {
                found.push(id);
            }
            if id != root && stop(self, id) {
                continue;
            }
            // 文書順を保つため逆順に積む
            stack.extend(self.children(id).into_iter().rev());
        }
        found
    }

    fn notify(&self, batch: MutationBatch) {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        // 受信側が閉じた購読者は取り除く
        observers.retain(|tx| tx.send(batch.clone()).is_ok());
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Element>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Element>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// scraperの要素を再帰的に取り込む
fn add_element(nodes: &mut Vec<Element>, el: ElementRef<'_>, parent: Option<NodeId>) -> NodeId {
    let id = NodeId(nodes.len());
    let value = el.value();
    nodes.push(Element {
        tag: value.name().to_string(),
        attrs: value
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        classes: value.classes().map(str::to_string).collect(),
        parent,
        children: Vec::new(),
        inner_html: el.inner_html(),
        detached: false,
    });

    let children: Vec<NodeId> = el
        .children()
        .filter_map(ElementRef::wrap)
        .map(|child| add_element(nodes, child, Some(id)))
        .collect();
    nodes[id.0].children = children;

    if let Some(parent) = parent {
        if !nodes[parent.0].children.contains(&id) {
            nodes[parent.0].children.push(id);
        }
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div id="main" class="a b">
            <p class="x">one</p>
            <p class="x">two <b>bold</b></p>
          </div>
        </body></html>
    "#;

    fn find_by_id(doc: &Document, id: &str) -> NodeId {
        let root = doc.root().unwrap();
        doc.find_all(root, |d, n| d.attr(n, "id").as_deref() == Some(id))[0]
    }

    #[test]
    fn test_parse_builds_tree() {
        let doc = Document::parse(PAGE);
        let root = doc.root().unwrap();
        assert_eq!(doc.tag(root).as_deref(), Some("html"));

        let main = find_by_id(&doc, "main");
        assert!(doc.has_class(main, "a"));
        assert!(doc.has_class(main, "b"));
        assert_eq!(doc.children(main).len(), 2);

        let paragraphs = doc.find_all(root, |d, n| d.has_class(n, "x"));
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(doc.inner_html(paragraphs[0]).as_deref(), Some("one"));
        assert_eq!(
            doc.inner_html(paragraphs[1]).as_deref(),
            Some("two <b>bold</b>")
        );
        assert_eq!(doc.parent(paragraphs[0]), Some(main));
    }

    #[test]
    fn test_set_inner_html() {
        let doc = Document::parse(PAGE);
        let root = doc.root().unwrap();
        let first = doc.find_all(root, |d, n| d.has_class(n, "x"))[0];

        assert!(doc.set_inner_html(first, "changed".to_string()));
        assert_eq!(doc.inner_html(first).as_deref(), Some("changed"));
    }

    #[test]
    fn test_find_within_stops_descending() {
        let doc = Document::parse(PAGE);
        let root = doc.root().unwrap();
        let found = doc.find_within(
            root,
            |d, n| d.tag(n).as_deref() == Some("b"),
            |d, n| d.has_class(n, "x"),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn test_detach() {
        let doc = Document::parse(PAGE);
        let main = find_by_id(&doc, "main");
        let first = doc.children(main)[0];

        assert!(doc.is_attached(first));
        doc.detach(first);
        assert!(!doc.is_attached(first));
        assert_eq!(doc.children(main).len(), 1);
    }

    #[tokio::test]
    async fn test_append_html_notifies_subscribers() {
        let doc = Document::parse(PAGE);
        let main = find_by_id(&doc, "main");
        let mut rx = doc.subscribe();

        let added = doc.append_html(main, r#"<p class="x">three</p><p class="y">four</p>"#);
        assert_eq!(added.len(), 2);
        assert_eq!(doc.children(main).len(), 4);
        assert_eq!(doc.inner_html(added[0]).as_deref(), Some("three"));

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.added_nodes, added);
    }
}
