//! Atom 1.0 feed decoding, enough to read release notes.

use std::io::{self, Read};
use std::str::FromStr;

use quick_xml::de::DeError;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("read atom feed failed: {0}")]
    Read(#[from] io::Error),
    #[error("decode atom feed failed: {0}")]
    Decode(#[from] DeError),
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default, rename = "link")]
    pub links: Vec<Link>,
    #[serde(default, rename = "entry")]
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub author: Person,
    #[serde(default, rename = "link")]
    pub links: Vec<Link>,
    #[serde(default)]
    pub content: Text,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
pub struct Link {
    #[serde(default, rename = "@rel")]
    pub rel: String,
    #[serde(default, rename = "@href")]
    pub href: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
pub struct Text {
    #[serde(default, rename = "@type")]
    pub kind: String,
    #[serde(default, rename = "$text")]
    pub body: String,
}

impl Feed {
    pub fn load<R: Read>(mut reader: R) -> Result<Self, Error> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;

        content.parse()
    }

    /// The first entry in document order.
    pub fn latest_entry(&self) -> Option<&Entry> {
        self.entries.first()
    }

    pub fn link(&self) -> Option<&Link> {
        self.links.first()
    }
}

impl FromStr for Feed {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(quick_xml::de::from_str(s)?)
    }
}

impl Entry {
    pub fn link(&self) -> Option<&Link> {
        self.links.first()
    }
}
