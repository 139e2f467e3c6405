/// Owned element tree the display handlers patch and the terminal renders.
///
/// Elements are addressed the way page markup addresses them: by `id`, by
/// class name, or by tag for the first matching descendant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    tag: String,
    id: Option<String>,
    class: String,
    text: String,
    checked: bool,
    scroll_top: usize,
    children: Vec<Element>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Element {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_checked(&self) -> bool {
        self.checked
    }

    pub fn scroll_top(&self) -> usize {
        self.scroll_top
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.class.split_whitespace().any(|class| class == name)
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn set_class(&mut self, class: impl Into<String>) {
        self.class = class.into();
    }

    pub fn set_checked(&mut self, checked: bool) {
        self.checked = checked;
    }

    pub fn set_scroll_top(&mut self, scroll_top: usize) {
        self.scroll_top = scroll_top.min(self.children.len());
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_top = self.children.len();
    }

    pub fn append_child(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn prepend_child(&mut self, child: Element) {
        self.children.insert(0, child);
    }

    pub fn clear_children(&mut self) {
        self.children.clear();
        self.scroll_top = 0;
    }

    /// Text of this element and all descendants, space separated.
    pub fn text_content(&self) -> String {
        let mut parts = Vec::new();
        self.collect_text(&mut parts);
        parts.join(" ")
    }

    fn collect_text<'a>(&'a self, parts: &mut Vec<&'a str>) {
        if !self.text.is_empty() {
            parts.push(&self.text);
        }
        for child in &self.children {
            child.collect_text(parts);
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if self.id.as_deref() == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_by_id(id))
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        if self.id.as_deref() == Some(id) {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_by_id_mut(id))
    }

    /// First descendant (not self) with the given tag.
    pub fn find_by_tag(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find_map(|child| {
            if child.tag == tag {
                Some(child)
            } else {
                child.find_by_tag(tag)
            }
        })
    }

    pub fn find_by_tag_mut(&mut self, tag: &str) -> Option<&mut Element> {
        for child in self.children.iter_mut() {
            if child.tag == tag {
                return Some(child);
            }
            if let Some(found) = child.find_by_tag_mut(tag) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_by_class(&self, class: &str) -> Option<&Element> {
        if self.has_class(class) {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_by_class(class))
    }

    pub fn find_by_class_mut(&mut self, class: &str) -> Option<&mut Element> {
        if self.has_class(class) {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_by_class_mut(class))
    }

    fn remove_by_id(&mut self, id: &str) -> Option<Element> {
        if let Some(idx) = self
            .children
            .iter()
            .position(|child| child.id.as_deref() == Some(id))
        {
            let removed = self.children.remove(idx);
            self.scroll_top = self.scroll_top.min(self.children.len());
            return Some(removed);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.remove_by_id(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    body: Element,
}

impl Default for Document {
    fn default() -> Self {
        Document::new(Element::new("body"))
    }
}

impl Document {
    pub fn new(body: Element) -> Self {
        Document { body }
    }

    pub fn body(&self) -> &Element {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Element {
        &mut self.body
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<&Element> {
        self.body.find_by_id(id)
    }

    pub fn get_element_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.body.find_by_id_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get_element_by_id(id).is_some()
    }

    pub fn query_class(&self, class: &str) -> Option<&Element> {
        self.body.find_by_class(class)
    }

    pub fn query_class_mut(&mut self, class: &str) -> Option<&mut Element> {
        self.body.find_by_class_mut(class)
    }

    /// Detaches the element with `id` from wherever it sits in the tree.
    pub fn remove_element(&mut self, id: &str) -> Option<Element> {
        self.body.remove_by_id(id)
    }
}
