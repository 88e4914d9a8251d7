//! Start conditions and image filtering for the analysis range.

use crate::image::ImageTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The configured analysis start conditions.
///
/// Four forms exist: from-entry-point, from-named-symbol, from-address-set
/// and from-offset-set. The entry-point form is resolved at image-load time
/// by converting the image's entry address into the from-address set,
/// exactly once. The symbol form, when configured, takes precedence and
/// suppresses the set forms entirely.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct StartSet {
    from_entry: bool,
    from_symbol: Option<String>,
    from_address: BTreeSet<u64>,
    from_offset: BTreeSet<u64>,
}

impl StartSet {
    /// Create a new, empty start set. With no conditions configured the
    /// analysis never starts on its own.
    pub fn new() -> StartSet {
        StartSet::default()
    }

    /// Start the analysis at the entry point of the next loaded image.
    pub fn set_from_entry(&mut self) {
        self.from_entry = true;
    }

    /// Start the analysis when execution reaches the named symbol.
    pub fn set_from_symbol<S: Into<String>>(&mut self, symbol: S) {
        self.from_symbol = Some(symbol.into());
    }

    /// Start the analysis when execution reaches the given address.
    pub fn add_address(&mut self, address: u64) {
        self.from_address.insert(address);
    }

    /// Start the analysis when execution reaches the given image-relative
    /// offset.
    pub fn add_offset(&mut self, offset: u64) {
        self.from_offset.insert(offset);
    }

    /// Get the configured start symbol, if any.
    pub fn from_symbol(&self) -> Option<&str> {
        self.from_symbol.as_deref()
    }

    /// Consume a pending from-entry-point request against a freshly loaded
    /// image, converting it into a from-address condition. One-shot: only
    /// the first image load after the request takes effect.
    pub fn consume_entry_request(&mut self, entry: u64) {
        if self.from_entry {
            self.from_entry = false;
            self.from_address.insert(entry);
        }
    }

    /// Does the given address satisfy a start condition?
    pub fn matches(&self, address: u64, images: &ImageTable) -> bool {
        if let Some(ref symbol) = self.from_symbol {
            images.symbol_at(address) == Some(symbol.as_str())
        } else if self.from_address.contains(&address) {
            true
        } else {
            images
                .offset_of(address)
                .map(|offset| self.from_offset.contains(&offset))
                .unwrap_or(false)
        }
    }
}

/// Blacklist/whitelist of images whose code may be instrumented.
///
/// Entries are substrings matched against the image path. A blacklist
/// match always wins; an empty whitelist passes every image.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ImageFilter {
    blacklist: Vec<String>,
    whitelist: Vec<String>,
}

impl ImageFilter {
    /// Create a new, permissive image filter.
    pub fn new() -> ImageFilter {
        ImageFilter::default()
    }

    /// Exclude images whose path contains the given substring.
    pub fn blacklist<S: Into<String>>(&mut self, substring: S) {
        self.blacklist.push(substring.into());
    }

    /// Restrict instrumentation to images whose path contains the given
    /// substring.
    pub fn whitelist<S: Into<String>>(&mut self, substring: S) {
        self.whitelist.push(substring.into());
    }

    /// May code from the image at this path be instrumented?
    pub fn permits(&self, path: &str) -> bool {
        if self.blacklist.iter().any(|entry| path.contains(entry.as_str())) {
            return false;
        }
        if self.whitelist.is_empty() {
            return true;
        }
        self.whitelist.iter().any(|entry| path.contains(entry.as_str()))
    }
}
