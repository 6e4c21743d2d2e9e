//! Extraction of posts from a thread page.
//!
//! The parsed document is never mutated. Quote blocks and hyperlinks are
//! excluded from the body by pruning them during the text walk, so the
//! result does not depend on the order in which parts are read.

use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::post_id::PostId;

/// Separator placed between text runs of the body.
pub const PARAGRAPH_SEPARATOR: &str = "\n";

/// Separator placed between consecutive quote blocks in `quoted_text`.
const QUOTE_SEPARATOR: &str = "\n\n";

/// Elements whose text is never visible.
const NON_VISIBLE_TAGS: &[&str] = &["script", "style", "noscript", "template"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector for class {class:?}: {message}")]
    InvalidSelector { class: String, message: String },
    #[error("invalid base URL {url:?}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// One post of the thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    /// Visible text without quote blocks and link anchors.
    pub body: String,
    /// Text of the outermost quote blocks, in document order.
    pub quoted_text: String,
    /// Absolute in-body link targets followed by the post's permalinks.
    pub links: Vec<String>,
    /// Absolute image sources that passed the [`ImageFilter`].
    pub images: Vec<String>,
}

/// Class names that make up the page's markup vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupClasses {
    pub container: String,
    pub content: String,
    pub controls: String,
    pub quote_block: String,
    pub permalink: String,
}

impl Default for MarkupClasses {
    fn default() -> Self {
        Self {
            container: "postcontainer".to_string(),
            content: "postrow".to_string(),
            controls: "nodecontrols".to_string(),
            quote_block: "bbcode_container".to_string(),
            permalink: "postcounter".to_string(),
        }
    }
}

/// Compiled selectors for a [`MarkupClasses`] vocabulary.
#[derive(Debug, Clone)]
pub struct Selectors {
    container: Selector,
    content: Selector,
    controls: Selector,
    quote_block: Selector,
    permalink: Selector,
    anchor: Selector,
    image: Selector,
}

impl Selectors {
    /// Compile class-name selectors.
    ///
    /// # Errors
    ///
    /// Returns an error if a class name does not form a valid CSS selector.
    pub fn compile(classes: &MarkupClasses) -> Result<Self, ExtractError> {
        Ok(Self {
            container: class_selector(&classes.container)?,
            content: class_selector(&classes.content)?,
            controls: class_selector(&classes.controls)?,
            quote_block: class_selector(&classes.quote_block)?,
            permalink: class_selector(&classes.permalink)?,
            anchor: parse_selector("a[href]", "a")?,
            image: parse_selector("img[src]", "img")?,
        })
    }
}

fn class_selector(class: &str) -> Result<Selector, ExtractError> {
    if class.is_empty() || class.chars().any(char::is_whitespace) {
        return Err(ExtractError::InvalidSelector {
            class: class.to_string(),
            message: "must be a single class name".to_string(),
        });
    }
    parse_selector(&format!(".{class}"), class)
}

fn parse_selector(css: &str, class: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::InvalidSelector {
        class: class.to_string(),
        message: format!("{e:?}"),
    })
}

/// Rejects images hosted on blocklisted hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFilter {
    excluded_hosts: Vec<String>,
}

impl ImageFilter {
    /// A filter excluding the given hosts and their subdomains.
    #[must_use]
    pub fn new<I, S>(excluded_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            excluded_hosts: excluded_hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn allows(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        !self
            .excluded_hosts
            .iter()
            .any(|excluded| host == *excluded || host.ends_with(&format!(".{excluded}")))
    }
}

/// Turns a thread page into [`Post`] records.
#[derive(Debug, Clone)]
pub struct Extractor {
    selectors: Selectors,
    base_url: Url,
    image_filter: ImageFilter,
}

impl Extractor {
    /// Create an extractor resolving relative URLs against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` cannot be parsed.
    pub fn new(
        selectors: Selectors,
        base_url: &str,
        image_filter: ImageFilter,
    ) -> Result<Self, ExtractError> {
        let base_url = Url::parse(base_url).map_err(|source| ExtractError::InvalidBaseUrl {
            url: base_url.to_string(),
            source,
        })?;
        Ok(Self {
            selectors,
            base_url,
            image_filter,
        })
    }

    /// Extract every dispatchable post of `document`, in document order.
    ///
    /// Containers missing a content or controls region, or whose controls
    /// carry no digits, are skipped.
    #[must_use]
    pub fn extract(&self, document: &str) -> Vec<Post> {
        let html = Html::parse_document(document);
        let mut containers = 0usize;
        let posts: Vec<Post> = html
            .select(&self.selectors.container)
            .inspect(|_| containers += 1)
            .filter_map(|container| self.extract_post(container))
            .collect();

        if containers == 0 {
            warn!("No post containers found on page; check the markup class configuration");
        } else {
            debug!(containers, posts = posts.len(), "Extracted posts from page");
        }
        posts
    }

    fn extract_post(&self, container: ElementRef<'_>) -> Option<Post> {
        let s = &self.selectors;
        let Some(content) = container.select(&s.content).next() else {
            debug!("Skipping container without content region");
            return None;
        };
        let Some(controls) = container.select(&s.controls).next() else {
            debug!("Skipping container without controls region");
            return None;
        };

        let Some(id) = PostId::from_marked_text(&visible_text(controls, &|_| false)) else {
            debug!("Skipping container without a post number");
            return None;
        };

        let mut quotes = Vec::new();
        outermost_matches(content, &s.quote_block, &mut quotes);
        let quoted_text = quotes
            .iter()
            .map(|quote| visible_text(*quote, &|_| false))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(QUOTE_SEPARATOR);

        let mut links = Vec::new();
        for anchor in content.select(&s.anchor) {
            if self.is_quoted(anchor, content) {
                continue;
            }
            if let Some(url) = anchor.value().attr("href").and_then(|h| self.resolve(h)) {
                push_unique(&mut links, url.into());
            }
        }
        for permalink in controls.select(&s.permalink) {
            if let Some(url) = permalink.value().attr("href").and_then(|h| self.resolve(h)) {
                push_unique(&mut links, url.into());
            }
        }

        let mut images = Vec::new();
        for image in content.select(&s.image) {
            if self.is_quoted(image, content) {
                continue;
            }
            let Some(url) = image.value().attr("src").and_then(|src| self.resolve(src)) else {
                continue;
            };
            if self.image_filter.allows(&url) {
                push_unique(&mut images, url.into());
            } else {
                debug!(post_id = %id, url = %url, "Excluding image from blocklisted host");
            }
        }

        let body = visible_text(content, &|el| {
            el.value().name() == "a" || s.quote_block.matches(el)
        });

        Some(Post {
            id,
            body,
            quoted_text,
            links,
            images,
        })
    }

    /// Whether `element` sits inside a quote block below `region`.
    fn is_quoted(&self, element: ElementRef<'_>, region: ElementRef<'_>) -> bool {
        for ancestor in element.ancestors() {
            if ancestor == *region {
                return false;
            }
            if ElementRef::wrap(ancestor).is_some_and(|el| self.selectors.quote_block.matches(&el)) {
                return true;
            }
        }
        false
    }

    /// Resolve `href` against the base URL, keeping only http(s) targets.
    fn resolve(&self, href: &str) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            return None;
        }
        let url = self.base_url.join(href).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(url)
    }
}

/// Collect elements matching `selector` that are not nested in another match.
fn outermost_matches<'a>(element: ElementRef<'a>, selector: &Selector, out: &mut Vec<ElementRef<'a>>) {
    for child in element.children().filter_map(ElementRef::wrap) {
        if selector.matches(&child) {
            out.push(child);
        } else {
            outermost_matches(child, selector, out);
        }
    }
}

/// Trimmed, non-empty text runs below `element`, joined with [`PARAGRAPH_SEPARATOR`].
///
/// Subtrees for which `prune` returns true contribute nothing.
fn visible_text(element: ElementRef<'_>, prune: &dyn Fn(&ElementRef<'_>) -> bool) -> String {
    let mut runs = Vec::new();
    collect_text(element, prune, &mut runs);
    runs.join(PARAGRAPH_SEPARATOR)
}

fn collect_text<'a>(
    element: ElementRef<'a>,
    prune: &dyn Fn(&ElementRef<'_>) -> bool,
    runs: &mut Vec<&'a str>,
) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    runs.push(trimmed);
                }
            }
            Node::Element(el) => {
                if NON_VISIBLE_TAGS.contains(&el.name()) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    if !prune(&child_el) {
                        collect_text(child_el, prune, runs);
                    }
                }
            }
            _ => {}
        }
    }
}

fn push_unique(list: &mut Vec<String>, url: String) {
    if !list.contains(&url) {
        list.push(url);
    }
}
