//! A registry of loaded images and their symbols.
//!
//! Images are tracked from image-load events even while the analysis
//! trigger is off, so that symbol names and image-relative offsets resolve
//! once the analysis does start.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named address inside an image.
#[derive(Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Symbol {
    address: u64,
    name: String,
}

impl Symbol {
    pub fn new<S: Into<String>>(name: S, address: u64) -> Symbol {
        Symbol {
            name: name.into(),
            address,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u64 {
        self.address
    }
}

/// A loaded image (module) as reported by the host DBI engine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Image {
    path: String,
    base: u64,
    size: u64,
    entry: u64,
    symbols: Vec<Symbol>,
}

impl Image {
    /// Create a new image record.
    pub fn new<S: Into<String>>(
        path: S,
        base: u64,
        size: u64,
        entry: u64,
        symbols: Vec<Symbol>,
    ) -> Image {
        Image {
            path: path.into(),
            base,
            size,
            entry,
            symbols,
        }
    }

    /// Get the filesystem path of this image.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the load base address of this image.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Get the size of this image's mapping in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the entry address of this image.
    pub fn entry(&self) -> u64 {
        self.entry
    }

    /// Get the symbols declared by this image.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Does this image's mapping contain the given address?
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address - self.base < self.size
    }

    /// Find a symbol by name in this image.
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|symbol| symbol.name() == name)
    }

    /// Find the symbol covering the given address, taking the nearest
    /// preceding symbol inside this image.
    pub fn symbol_at(&self, address: u64) -> Option<&Symbol> {
        if !self.contains(address) {
            return None;
        }
        self.symbols
            .iter()
            .filter(|symbol| symbol.address() <= address)
            .max_by_key(|symbol| symbol.address())
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} @ {:x}+{:x}", self.path, self.base, self.size)
    }
}

/// All images loaded so far.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ImageTable {
    images: Vec<Image>,
}

impl ImageTable {
    /// Create a new, empty image table.
    pub fn new() -> ImageTable {
        ImageTable { images: Vec::new() }
    }

    /// Record a loaded image.
    pub fn insert(&mut self, image: Image) {
        self.images.push(image);
    }

    /// Get every loaded image.
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// Find the image whose mapping contains the given address.
    pub fn image_at(&self, address: u64) -> Option<&Image> {
        self.images.iter().find(|image| image.contains(address))
    }

    /// Find the symbol name covering the given address.
    pub fn symbol_at(&self, address: u64) -> Option<&str> {
        self.image_at(address)
            .and_then(|image| image.symbol_at(address))
            .map(|symbol| symbol.name())
    }

    /// Get the offset of the given address from its owning image's base.
    pub fn offset_of(&self, address: u64) -> Option<u64> {
        self.image_at(address).map(|image| address - image.base())
    }
}
