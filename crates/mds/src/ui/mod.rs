//! Host UI document tree.
//!
//! The controller only needs element lookup by id, a handful of property
//! accessors and event registration. [`headless::HeadlessDocument`] is an
//! in-memory implementation.

pub mod headless;

use std::sync::Arc;

use futures::future::BoxFuture;

pub use headless::HeadlessDocument;

/// Event handler. The returned future runs the handler to completion; hosts
/// decide whether to await it or spawn it.
pub type Listener = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub trait Element: Send + Sync {
    /// Current value of a text input, textarea or select.
    fn value(&self) -> String;
    fn set_value(&self, value: &str);
    fn checked(&self) -> bool;
    fn set_checked(&self, checked: bool);
    fn set_inner_html(&self, html: &str);
    fn set_disabled(&self, disabled: bool);
    fn add_event_listener(&self, event: &str, listener: Listener);
}

pub trait UiDocument: Send + Sync + 'static {
    type Element: Element;

    fn element_by_id(&self, id: &str) -> Option<Self::Element>;

    /// Resolves once the document accepts mutations.
    fn when_interactive(&self) -> BoxFuture<'_, ()> {
        Box::pin(futures::future::ready(()))
    }
}

impl<T: UiDocument> UiDocument for Arc<T> {
    type Element = T::Element;

    fn element_by_id(&self, id: &str) -> Option<Self::Element> {
        (**self).element_by_id(id)
    }

    fn when_interactive(&self) -> BoxFuture<'_, ()> {
        (**self).when_interactive()
    }
}
