//! RSS 2.0 output of aggregated items.

use std::io::Cursor;

use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::models::{FeedItemWithFeed, FeedType};

pub const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";
/// Items per feed-type RSS document.
pub const FEED_TYPE_LIMIT: u32 = 25;
/// Items in the firehose RSS document.
pub const FIREHOSE_LIMIT: u32 = 50;

#[derive(Debug, Clone)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl Channel {
    pub fn for_feed_type(feed_type: &FeedType, site_url: &str) -> Self {
        Self {
            title: format!("RaspberryIO community aggregator: {}", feed_type.name),
            link: format!("{}/community/blogs/{}/", site_url, feed_type.slug),
            description: format!(
                "The latest {} posts from the RaspberryIO community",
                feed_type.name
            ),
        }
    }

    pub fn firehose(site_url: &str) -> Self {
        Self {
            title: "RaspberryIO community aggregator firehose".to_string(),
            link: format!("{}/community/blogs/", site_url),
            description: "All the latest posts from the RaspberryIO community".to_string(),
        }
    }
}

pub fn render_rss(channel: &Channel, items: &[FeedItemWithFeed]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(rss))
        .context("Failed to write rss element")?;
    writer
        .write_event(Event::Start(BytesStart::new("channel")))
        .context("Failed to write channel element")?;

    write_text_element(&mut writer, "title", &channel.title)?;
    write_text_element(&mut writer, "link", &channel.link)?;
    write_text_element(&mut writer, "description", &channel.description)?;
    if let Some(newest) = items.first() {
        write_text_element(
            &mut writer,
            "lastBuildDate",
            &newest.item.date_modified.to_rfc2822(),
        )?;
    }

    for entry in items {
        writer
            .write_event(Event::Start(BytesStart::new("item")))
            .context("Failed to write item element")?;

        write_text_element(&mut writer, "title", &entry.item.title)?;
        write_text_element(&mut writer, "link", &entry.item.link)?;
        if let Some(summary) = &entry.item.summary {
            write_text_element(&mut writer, "description", summary)?;
        }
        write_text_element(&mut writer, "source", &entry.feed_title)?;
        write_text_element(&mut writer, "pubDate", &entry.item.date_modified.to_rfc2822())?;

        let mut guid = BytesStart::new("guid");
        guid.push_attribute(("isPermaLink", "false"));
        writer
            .write_event(Event::Start(guid))
            .context("Failed to write guid element")?;
        writer
            .write_event(Event::Text(BytesText::new(&entry.item.guid)))
            .context("Failed to write guid text")?;
        writer
            .write_event(Event::End(BytesEnd::new("guid")))
            .context("Failed to write guid end")?;

        writer
            .write_event(Event::End(BytesEnd::new("item")))
            .context("Failed to write item end")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .context("Failed to write channel end")?;
    writer
        .write_event(Event::End(BytesEnd::new("rss")))
        .context("Failed to write rss end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated RSS contains invalid UTF-8")
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .with_context(|| format!("Failed to write {} element", name))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .with_context(|| format!("Failed to write {} text", name))?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .with_context(|| format!("Failed to write {} end", name))?;
    Ok(())
}
