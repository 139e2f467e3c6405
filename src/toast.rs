use std::collections::VecDeque;
use std::time::Duration;

use chrono::Local;
use tokio::time::Instant;

use crate::dom::{Document, Element};

pub const TOAST_CONTAINER_ID: &str = "toastContainer";
pub const DEFAULT_TOAST_TTL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Success,
    Info,
    Warning,
    Danger,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Danger => "danger",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Toast {
    pub fn new(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Toast {
            title: title.into(),
            message: message.into(),
            severity,
        }
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Toast::new(title, message, Severity::Success)
    }
}

/// Creates toast elements and removes them once their time is up.
#[derive(Debug)]
pub struct Notifier {
    ttl: Duration,
    next_seq: u64,
    pending: VecDeque<(String, Instant)>,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        Notifier {
            ttl,
            next_seq: 0,
            pending: VecDeque::new(),
        }
    }

    /// Every call adds a new toast; nothing is merged or capped.
    pub fn show(&mut self, doc: &mut Document, toast: &Toast, now: Instant) -> String {
        self.next_seq += 1;
        let toast_id = format!("toast-{}", self.next_seq);
        let element = Element::new("div")
            .with_id(toast_id.clone())
            .with_class(format!("toast text-bg-{}", toast.severity.as_str()))
            .with_child(
                Element::new("div")
                    .with_class("toast-header")
                    .with_child(
                        Element::new("strong")
                            .with_class("me-auto")
                            .with_text(&toast.title),
                    )
                    .with_child(
                        Element::new("small").with_text(Local::now().format("%H:%M:%S").to_string()),
                    )
                    .with_child(
                        Element::new("button")
                            .with_id(format!("{toast_id}-close"))
                            .with_class("btn-close"),
                    ),
            )
            .with_child(
                Element::new("div")
                    .with_class("toast-body")
                    .with_text(&toast.message),
            );
        ensure_container(doc);
        if let Some(container) = doc.get_element_by_id_mut(TOAST_CONTAINER_ID) {
            container.append_child(element);
        }
        self.pending.push_back((toast_id.clone(), now + self.ttl));
        toast_id
    }

    /// Drops expired toasts; returns how many left the document.
    pub fn expire(&mut self, doc: &mut Document, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((_, deadline)) = self.pending.front() {
            if *deadline > now {
                break;
            }
            if let Some((toast_id, _)) = self.pending.pop_front() {
                if doc.remove_element(&toast_id).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Closes one toast ahead of its deadline.
    pub fn dismiss(&mut self, doc: &mut Document, toast_id: &str) -> bool {
        self.pending.retain(|(id, _)| id != toast_id);
        doc.remove_element(toast_id).is_some()
    }

    /// Closes the most recently shown toast that is still on screen.
    pub fn dismiss_latest(&mut self, doc: &mut Document) -> Option<String> {
        while let Some((toast_id, _)) = self.pending.pop_back() {
            if doc.remove_element(&toast_id).is_some() {
                return Some(toast_id);
            }
        }
        None
    }

    /// Forget outstanding toasts, e.g. after the document was rebuilt.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

fn ensure_container(doc: &mut Document) {
    if doc.contains(TOAST_CONTAINER_ID) {
        return;
    }
    doc.body_mut().append_child(
        Element::new("div")
            .with_id(TOAST_CONTAINER_ID)
            .with_class("toast-container position-fixed bottom-0 end-0 p-3"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toasts(doc: &Document) -> Vec<String> {
        doc.get_element_by_id(TOAST_CONTAINER_ID)
            .map(|container| {
                container
                    .children()
                    .iter()
                    .filter_map(|toast| toast.id().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn container_is_created_once() {
        let mut doc = Document::default();
        let mut notifier = Notifier::new(DEFAULT_TOAST_TTL);
        let now = Instant::now();
        notifier.show(&mut doc, &Toast::success("a", "1"), now);
        notifier.show(&mut doc, &Toast::success("a", "1"), now);
        let containers = doc
            .body()
            .children()
            .iter()
            .filter(|child| child.id() == Some(TOAST_CONTAINER_ID))
            .count();
        assert_eq!(containers, 1);
        assert_eq!(toasts(&doc).len(), 2);
    }

    #[test]
    fn toast_carries_title_message_and_severity() {
        let mut doc = Document::default();
        let mut notifier = Notifier::new(DEFAULT_TOAST_TTL);
        let id = notifier.show(
            &mut doc,
            &Toast::new("连接错误", "无法从服务器获取数据", Severity::Danger),
            Instant::now(),
        );
        let toast = doc.get_element_by_id(&id).unwrap();
        assert!(toast.has_class("text-bg-danger"));
        let text = toast.text_content();
        assert!(text.contains("连接错误"));
        assert!(text.contains("无法从服务器获取数据"));
    }

    #[test]
    fn toasts_expire_after_ttl() {
        let mut doc = Document::default();
        let mut notifier = Notifier::new(Duration::from_millis(5000));
        let start = Instant::now();
        let first = notifier.show(&mut doc, &Toast::success("a", "1"), start);
        let second = notifier.show(
            &mut doc,
            &Toast::success("b", "2"),
            start + Duration::from_millis(3000),
        );

        assert_eq!(notifier.expire(&mut doc, start + Duration::from_millis(4999)), 0);
        assert_eq!(notifier.expire(&mut doc, start + Duration::from_millis(5000)), 1);
        assert_eq!(toasts(&doc), vec![second.clone()]);
        assert!(!doc.contains(&first));
        assert_eq!(notifier.expire(&mut doc, start + Duration::from_millis(8000)), 1);
        assert!(toasts(&doc).is_empty());
    }

    #[test]
    fn toast_header_has_a_close_button() {
        let mut doc = Document::default();
        let mut notifier = Notifier::new(DEFAULT_TOAST_TTL);
        let id = notifier.show(&mut doc, &Toast::success("a", "1"), Instant::now());
        let close = doc.get_element_by_id(&format!("{id}-close")).unwrap();
        assert!(close.has_class("btn-close"));
    }

    #[test]
    fn dismissed_toasts_leave_before_their_deadline() {
        let mut doc = Document::default();
        let mut notifier = Notifier::new(Duration::from_millis(5000));
        let start = Instant::now();
        let first = notifier.show(&mut doc, &Toast::success("a", "1"), start);
        let second = notifier.show(&mut doc, &Toast::success("b", "2"), start);
        let third = notifier.show(&mut doc, &Toast::success("c", "3"), start);

        assert!(notifier.dismiss(&mut doc, &first));
        assert!(!notifier.dismiss(&mut doc, &first));
        assert_eq!(notifier.dismiss_latest(&mut doc), Some(third));
        assert_eq!(toasts(&doc), vec![second.clone()]);
        assert_eq!(notifier.expire(&mut doc, start + Duration::from_millis(5000)), 1);
        assert_eq!(notifier.dismiss_latest(&mut doc), None);
    }

    #[test]
    fn expiry_tolerates_toasts_already_removed() {
        let mut doc = Document::default();
        let mut notifier = Notifier::new(Duration::from_millis(10));
        let start = Instant::now();
        let id = notifier.show(&mut doc, &Toast::success("a", "1"), start);
        doc.remove_element(&id);
        assert_eq!(notifier.expire(&mut doc, start + Duration::from_secs(1)), 0);
    }
}
