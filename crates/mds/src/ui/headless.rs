//! In-memory UI document.
//!
//! Understands the widget markup produced by
//! [`variable::fragment`](crate::variable::fragment): every `button`, `input`,
//! `textarea`, `select` and `div` carrying an `id` attribute becomes an
//! addressable element whose state (value, checked, inner HTML, disabled) is
//! tracked in memory. Useful for tests and for running documents without a
//! browser.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, LazyLock},
};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use smallvec::SmallVec;
use tokio::sync::watch;
use tracing::trace;

use super::{Element, Listener, UiDocument};
use crate::{
    error::{Error, Result},
    variable::unescape_attr,
};

static OPEN_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(button|input|textarea|select|div)\b([^>]*)>").expect("open tag pattern is valid")
});
static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*"([^"]*)")?"#)
        .expect("attribute pattern is valid")
});

#[derive(Default)]
struct Node {
    tag: String,
    value: String,
    checked: bool,
    disabled: bool,
    inner_html: String,
    /// Option values of a `select`, in order.
    options: Vec<String>,
    /// Ids of elements parsed out of `inner_html`.
    descendants: Vec<String>,
    listeners: Vec<(String, Listener)>,
}

#[derive(Default)]
struct Tree {
    nodes: HashMap<String, Node>,
}

impl Tree {
    fn remove_descendants(&mut self, id: &str) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let descendants = std::mem::take(&mut node.descendants);
        for child in descendants {
            self.remove_descendants(&child);
            self.nodes.remove(&child);
        }
    }

    /// Register every id'd element found in `html`, returning the ids that
    /// were inserted. As with `getElementById`, the first element holding an
    /// id keeps it; later duplicates are not addressable.
    fn register(&mut self, html: &str) -> Vec<String> {
        let mut fresh: Vec<(String, Node)> = Vec::new();
        for caps in OPEN_TAG.captures_iter(html) {
            let (Some(whole), Some(tag), Some(attrs)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let attrs = parse_attrs(attrs.as_str());
            let Some(id) = attrs.get("id").map(|v| unescape_attr(v).into_owned()) else {
                continue;
            };
            if self.nodes.contains_key(&id) || fresh.iter().any(|(seen, _)| *seen == id) {
                trace!(%id, "duplicate element id ignored");
                continue;
            }
            let tag = tag.as_str();
            let rest = &html[whole.end()..];
            let mut node = Node {
                tag: tag.to_string(),
                disabled: attrs.contains_key("disabled"),
                ..Node::default()
            };
            match tag {
                "input" => {
                    node.value = attrs
                        .get("value")
                        .map(|v| unescape_attr(v).into_owned())
                        .unwrap_or_default();
                    node.checked = attrs.contains_key("checked");
                }
                "textarea" => {
                    node.value = inner_until_close(rest, tag).to_string();
                }
                "select" => {
                    let inner = inner_until_close(rest, tag);
                    node.options = OPEN_OPTION
                        .captures_iter(inner)
                        .filter_map(|c| c.get(1))
                        .map(|m| unescape_attr(m.as_str()).into_owned())
                        .collect();
                    node.value = node.options.first().cloned().unwrap_or_default();
                }
                _ => {
                    node.inner_html = inner_until_close(rest, tag).to_string();
                    node.descendants = OPEN_TAG
                        .captures_iter(&node.inner_html)
                        .filter_map(|c| c.get(2))
                        .filter_map(|a| parse_attrs(a.as_str()).get("id").map(|v| (*v).to_string()))
                        .map(|v| unescape_attr(&v).into_owned())
                        .collect();
                }
            }
            trace!(%id, tag, "register element");
            fresh.push((id, node));
        }

        let ids: Vec<String> = fresh.iter().map(|(id, _)| id.clone()).collect();
        for (id, mut node) in fresh {
            // Only own what this call inserted.
            node.descendants.retain(|child| ids.contains(child));
            self.nodes.insert(id, node);
        }
        ids
    }
}

static OPEN_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<option\b[^>]*\bvalue="([^"]*)"[^>]*>"#).expect("option pattern is valid")
});

fn parse_attrs(raw: &str) -> HashMap<&str, &str> {
    ATTR.captures_iter(raw)
        .filter_map(|c| {
            let name = c.get(1)?.as_str();
            Some((name, c.get(2).map_or("", |v| v.as_str())))
        })
        .collect()
}

/// Content between the end of an opening `<tag ...>` and its matching close.
fn inner_until_close<'a>(rest: &'a str, tag: &str) -> &'a str {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut depth = 0_usize;
    let mut pos = 0;
    loop {
        let next_close = rest[pos..].find(&close).map(|i| i + pos);
        let next_open = rest[pos..].find(&open).map(|i| i + pos);
        match (next_open, next_close) {
            (Some(o), Some(c)) if o < c => {
                depth += 1;
                pos = o + open.len();
            }
            (_, Some(c)) if depth == 0 => return &rest[..c],
            (_, Some(c)) => {
                depth -= 1;
                pos = c + close.len();
            }
            (_, None) => return rest,
        }
    }
}

/// In-memory document. Cloning yields another handle to the same tree.
#[derive(Clone)]
pub struct HeadlessDocument {
    tree: Arc<Mutex<Tree>>,
    interactive: watch::Sender<bool>,
}

impl Default for HeadlessDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDocument {
    /// An interactive, empty document.
    #[must_use]
    pub fn new() -> Self {
        let (interactive, _) = watch::channel(true);
        Self {
            tree: Arc::default(),
            interactive,
        }
    }

    /// A document that stays non-interactive until [`Self::set_interactive`].
    #[must_use]
    pub fn loading() -> Self {
        let doc = Self::new();
        doc.interactive.send_replace(false);
        doc
    }

    pub fn set_interactive(&self) {
        self.interactive.send_replace(true);
    }

    /// Add a container element, typically the mount target of a document.
    #[must_use]
    pub fn with_container(self, id: &str) -> Self {
        self.tree.lock().nodes.insert(
            id.to_string(),
            Node {
                tag: "div".to_string(),
                ..Node::default()
            },
        );
        self
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.tree.lock().nodes.contains_key(id)
    }

    /// Fire `event` on element `id` and run its listeners to completion.
    /// Disabled elements swallow the event. Returns the number of listeners run.
    ///
    /// # Errors
    /// [`Error::MissingElement`] when no element has the id.
    pub async fn dispatch_event(&self, id: &str, event: &str) -> Result<usize> {
        let listeners: SmallVec<[Listener; 2]> = {
            let tree = self.tree.lock();
            let node = tree.nodes.get(id).ok_or_else(|| Error::MissingElement {
                id: id.to_string(),
            })?;
            if node.disabled {
                return Ok(0);
            }
            node.listeners
                .iter()
                .filter(|(name, _)| name == event)
                .map(|(_, l)| Arc::clone(l))
                .collect()
        };
        for listener in &listeners {
            listener().await;
        }
        Ok(listeners.len())
    }

    /// Shorthand for a `click` event.
    ///
    /// # Errors
    /// See [`Self::dispatch_event`].
    pub async fn click(&self, id: &str) -> Result<usize> {
        self.dispatch_event(id, "click").await
    }

    /// State of every element, keyed by id.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ElementSnapshot> {
        self.tree
            .lock()
            .nodes
            .iter()
            .map(|(id, node)| {
                (
                    id.clone(),
                    ElementSnapshot {
                        tag: node.tag.clone(),
                        value: node.value.clone(),
                        checked: node.checked,
                        disabled: node.disabled,
                        inner_html: node.inner_html.clone(),
                    },
                )
            })
            .collect()
    }

    fn with_node<T>(&self, id: &str, f: impl FnOnce(&mut Node) -> T) -> Option<T> {
        self.tree.lock().nodes.get_mut(id).map(f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ElementSnapshot {
    pub tag: String,
    pub value: String,
    pub checked: bool,
    pub disabled: bool,
    pub inner_html: String,
}

impl UiDocument for HeadlessDocument {
    type Element = HeadlessElement;

    fn element_by_id(&self, id: &str) -> Option<Self::Element> {
        self.contains(id).then(|| HeadlessElement {
            doc: self.clone(),
            id: id.to_string(),
        })
    }

    fn when_interactive(&self) -> BoxFuture<'_, ()> {
        let mut rx = self.interactive.subscribe();
        Box::pin(async move {
            // The sender lives in `self`, so the channel cannot close here.
            let _ = rx.wait_for(|ready| *ready).await;
        })
    }
}

/// Handle to one element of a [`HeadlessDocument`]. Operations on an element
/// that has since been removed are no-ops.
#[derive(Clone)]
pub struct HeadlessElement {
    doc: HeadlessDocument,
    id: String,
}

impl HeadlessElement {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn inner_html(&self) -> String {
        self.doc
            .with_node(&self.id, |n| n.inner_html.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.doc.with_node(&self.id, |n| n.disabled).unwrap_or(false)
    }

    /// Option values of a `select`.
    #[must_use]
    pub fn options(&self) -> Vec<String> {
        self.doc
            .with_node(&self.id, |n| n.options.clone())
            .unwrap_or_default()
    }
}

impl Element for HeadlessElement {
    fn value(&self) -> String {
        self.doc
            .with_node(&self.id, |n| n.value.clone())
            .unwrap_or_default()
    }

    fn set_value(&self, value: &str) {
        self.doc.with_node(&self.id, |n| {
            // Like a browser, a select only takes values it offers.
            if n.tag == "select" && !n.options.iter().any(|o| o == value) {
                n.value.clear();
            } else {
                n.value = value.to_string();
            }
        });
    }

    fn checked(&self) -> bool {
        self.doc.with_node(&self.id, |n| n.checked).unwrap_or(false)
    }

    fn set_checked(&self, checked: bool) {
        self.doc.with_node(&self.id, |n| n.checked = checked);
    }

    fn set_inner_html(&self, html: &str) {
        let mut tree = self.doc.tree.lock();
        if !tree.nodes.contains_key(&self.id) {
            return;
        }
        tree.remove_descendants(&self.id);
        let descendants = tree.register(html);
        if let Some(node) = tree.nodes.get_mut(&self.id) {
            node.inner_html = html.to_string();
            node.descendants = descendants;
        }
    }

    fn set_disabled(&self, disabled: bool) {
        self.doc.with_node(&self.id, |n| n.disabled = disabled);
    }

    fn add_event_listener(&self, event: &str, listener: Listener) {
        self.doc
            .with_node(&self.id, |n| n.listeners.push((event.to_string(), listener)));
    }
}
