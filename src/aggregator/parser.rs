use anyhow::{Context, Result};
use chrono::Utc;
use feed_rs::parser;
use sha2::{Digest, Sha256};

use crate::models::ParsedItem;

/// Reads an RSS, Atom or JSON Feed document into storable items.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<ParsedItem>> {
    let feed = parser::parse(bytes).context("Failed to parse feed document")?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let date_modified = entry.updated.or(entry.published).unwrap_or_else(Utc::now);
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());
            let guid = generate_guid(&entry.id, &link, &title);

            ParsedItem {
                guid,
                title,
                link,
                summary,
                date_modified,
            }
        })
        .collect();

    Ok(items)
}

/// Keeps the entry's own id; otherwise hashes what identifies the entry.
fn generate_guid(existing: &str, link: &str, title: &str) -> String {
    let trimmed = existing.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    let hash = Sha256::digest(format!("{}|{}", link, title).as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Potato blog</title>
    <link>http://potato.example/</link>
    <description>Spuds</description>
    <item>
      <title>First post</title>
      <link>http://potato.example/first</link>
      <guid>potato-1</guid>
      <description>Hello</description>
      <pubDate>Mon, 06 May 2013 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second post</title>
      <link>http://potato.example/second</link>
      <guid>potato-2</guid>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Pi projects</title>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2013-05-06T18:30:02Z</updated>
  <entry>
    <title>Robot arm</title>
    <link href="http://pi.example/robot"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2013-05-06T18:30:02Z</updated>
    <summary>Servos everywhere</summary>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let items = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].guid, "potato-1");
        assert_eq!(items[0].title, "First post");
        assert_eq!(items[0].link, "http://potato.example/first");
        assert_eq!(items[0].summary.as_deref(), Some("Hello"));
        assert_eq!(items[0].date_modified.to_rfc3339(), "2013-05-06T10:00:00+00:00");
    }

    #[test]
    fn parses_atom_entries() {
        let items = parse_feed(ATOM.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].guid, "urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a");
        assert_eq!(items[0].link, "http://pi.example/robot");
        assert_eq!(items[0].summary.as_deref(), Some("Servos everywhere"));
    }

    #[test]
    fn rejects_non_feed_documents() {
        assert!(parse_feed(b"<html><body>nope</body></html>").is_err());
    }

    #[test]
    fn blank_guid_falls_back_to_hash() {
        let a = generate_guid("  ", "http://a", "A");
        let b = generate_guid("", "http://a", "A");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, generate_guid("", "http://b", "A"));
    }
}
