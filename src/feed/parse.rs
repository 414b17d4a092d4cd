// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::ops::Range;

use chrono::{DateTime, FixedOffset};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::FeedError;

/// Show-level metadata of a parsed feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Podcast {
    pub title: String,
    pub description: String,
    pub link: String,
    pub language: String,
    pub author: String,
    pub image_url: String,
    pub rights: String,
    pub last_updated: String,
    pub feed_url: String,
}

/// A single feed entry with every optional field resolved to a default
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeEntry {
    pub title: String,
    pub description: String,
    pub published: Option<DateTime<FixedOffset>>,
    pub link: String,
    pub author: String,
    pub tags: Vec<String>,
    pub duration: String,
    pub episode_number: Option<u32>,
    pub season_number: Option<u32>,
    pub explicit: bool,
    pub image_url: String,
    pub guid: Option<String>,
    pub enclosure: Option<Enclosure>,
}

/// The downloadable media attached to an entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enclosure {
    /// URL exactly as it appears in the feed
    pub url: String,
    pub mime_type: Option<String>,
    pub length: Option<u64>,
}

/// Something that went wrong while parsing, without aborting the parse
#[derive(Debug, Clone, PartialEq)]
pub enum FeedWarning {
    /// The feed could not be fetched at all
    FetchFailed { reason: String },
    /// The document could not be parsed; no entries were recovered
    Malformed { reason: String },
    /// An entry had no usable enclosure and was dropped
    MissingEnclosure { index: usize, title: String },
}

impl fmt::Display for FeedWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedWarning::FetchFailed { reason } => write!(f, "feed fetch failed: {reason}"),
            FeedWarning::Malformed { reason } => write!(f, "feed is malformed: {reason}"),
            FeedWarning::MissingEnclosure { index, title } => {
                write!(f, "entry {} ('{}') has no audio enclosure", index + 1, title)
            }
        }
    }
}

/// Result of a best-effort feed parse
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub podcast: Podcast,
    /// Entries with an enclosure, in feed order
    pub entries: Vec<EpisodeEntry>,
    pub warnings: Vec<FeedWarning>,
}

impl ParsedFeed {
    /// An empty feed carrying a single warning
    pub fn empty(feed_url: &str, warning: FeedWarning) -> Self {
        Self {
            podcast: Podcast {
                feed_url: feed_url.to_string(),
                ..Default::default()
            },
            entries: Vec::new(),
            warnings: vec![warning],
        }
    }
}

/// Parse RSS 2.0 or Atom bytes.
///
/// RSS is tried first; anything the RSS reader rejects is handed to the
/// generic syndication parser. When neither accepts the document, the
/// entries that parse on their own are kept and a [`FeedWarning::Malformed`]
/// leads the warnings. With nothing salvageable the feed is empty.
pub fn parse_feed(xml_bytes: &[u8], feed_url: &str) -> ParsedFeed {
    let err = match parse_document(xml_bytes, feed_url) {
        Ok(parsed) => return parsed,
        Err(e) => e,
    };

    let warning = FeedWarning::Malformed {
        reason: err.to_string(),
    };

    match recover_entries(xml_bytes, feed_url) {
        Some(mut parsed) => {
            tracing::warn!(
                feed = feed_url,
                recovered = parsed.entries.len(),
                "feed is malformed, keeping the entries that parse on their own"
            );
            parsed.warnings.insert(0, warning);
            parsed
        }
        None => ParsedFeed::empty(feed_url, warning),
    }
}

fn parse_document(xml_bytes: &[u8], feed_url: &str) -> Result<ParsedFeed, FeedError> {
    let rss_err = match rss::Channel::read_from(xml_bytes) {
        Ok(channel) => return Ok(from_rss(&channel, feed_url)),
        Err(e) => e,
    };

    match syndication_parser().parse(xml_bytes) {
        Ok(feed) => Ok(from_syndication(&feed, feed_url)),
        Err(atom_err) => Err(FeedError::ParseFailed {
            rss: rss_err.to_string(),
            atom: atom_err.to_string(),
        }),
    }
}

/// feed-rs parser that leaves a missing entry id empty.
///
/// The default generator derives ids from link and title, which would turn
/// a retitled entry into a new episode instead of falling back to the
/// enclosure URL hash.
fn syndication_parser() -> feed_rs::parser::Parser {
    feed_rs::parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
}

/// Where the entries of a feed document sit
struct DocumentLayout {
    /// Everything before the first entry (declaration, root, channel fields)
    header_end: usize,
    /// Tags that close what the header opened
    closing: &'static str,
    /// Byte ranges of each `<item>` or `<entry>` element
    fragments: Vec<Range<usize>>,
}

/// Locate entries without validating the document.
///
/// End tag names are not checked, so a broken entry still has a range and
/// its neighbours stay intact.
fn scan_layout(xml: &str) -> Option<DocumentLayout> {
    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut closing = None;
    let mut fragments = Vec::new();
    let mut open: Option<usize> = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"rss" if closing.is_none() => closing = Some("</channel></rss>"),
                b"feed" if closing.is_none() => closing = Some("</feed>"),
                // An entry that never closed is abandoned here
                b"item" | b"entry" => open = Some(before),
                _ => {}
            },
            Ok(Event::End(e)) => {
                if matches!(e.local_name().as_ref(), b"item" | b"entry")
                    && let Some(start) = open.take()
                {
                    fragments.push(start..reader.buffer_position() as usize);
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }

    Some(DocumentLayout {
        header_end: fragments.first()?.start,
        closing: closing?,
        fragments,
    })
}

/// Salvage the well-formed entries of a document no parser accepts.
///
/// Each entry is tried on its own between the document header and the
/// closing tags; the ones that parse are put back together in feed order.
fn recover_entries(xml_bytes: &[u8], feed_url: &str) -> Option<ParsedFeed> {
    let xml = std::str::from_utf8(xml_bytes).ok()?;
    let layout = scan_layout(xml)?;
    let header = &xml[..layout.header_end];
    let wrap = |body: &str| format!("{header}{body}{}", layout.closing);

    let good: Vec<&str> = layout
        .fragments
        .iter()
        .map(|range| &xml[range.clone()])
        .filter(|fragment| parse_document(wrap(fragment).as_bytes(), feed_url).is_ok())
        .collect();

    tracing::debug!(
        total = layout.fragments.len(),
        usable = good.len(),
        "checked feed entries individually"
    );

    parse_document(wrap(&good.concat()).as_bytes(), feed_url).ok()
}

fn from_rss(channel: &rss::Channel, feed_url: &str) -> ParsedFeed {
    let itunes = channel.itunes_ext();

    let image_url = channel
        .image()
        .map(|img| img.url().to_string())
        .or_else(|| itunes.and_then(|ext| ext.image()).map(String::from))
        .unwrap_or_default();

    let author = itunes
        .and_then(|ext| ext.author())
        .or_else(|| channel.managing_editor())
        .unwrap_or_default()
        .to_string();

    let podcast = Podcast {
        title: non_empty(channel.title()).unwrap_or("Unknown Podcast").to_string(),
        description: clean_html_text(channel.description()),
        link: channel.link().to_string(),
        language: channel.language().unwrap_or_default().to_string(),
        author,
        image_url,
        rights: channel.copyright().unwrap_or_default().to_string(),
        last_updated: channel
            .last_build_date()
            .or_else(|| channel.pub_date())
            .unwrap_or_default()
            .to_string(),
        feed_url: feed_url.to_string(),
    };

    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    for (index, item) in channel.items().iter().enumerate() {
        let entry = entry_from_rss(item, index);
        if entry.enclosure.is_some() {
            entries.push(entry);
        } else {
            warnings.push(FeedWarning::MissingEnclosure {
                index,
                title: entry.title,
            });
        }
    }

    ParsedFeed {
        podcast,
        entries,
        warnings,
    }
}

fn entry_from_rss(item: &rss::Item, index: usize) -> EpisodeEntry {
    let itunes = item.itunes_ext();
    let dublin_core = item.dublin_core_ext();

    let description = item
        .description()
        .or_else(|| itunes.and_then(|ext| ext.summary()))
        .or_else(|| item.content())
        .map(clean_html_text)
        .unwrap_or_default();

    let published = item
        .pub_date()
        .or_else(|| dublin_core.and_then(|dc| dc.dates().first().map(String::as_str)))
        .and_then(parse_date);

    let author = item
        .author()
        .or_else(|| itunes.and_then(|ext| ext.author()))
        .or_else(|| dublin_core.and_then(|dc| dc.creators().first().map(String::as_str)))
        .unwrap_or_default()
        .to_string();

    let enclosure = item
        .enclosure()
        .and_then(|enc| {
            non_empty(enc.url()).map(|url| Enclosure {
                url: url.to_string(),
                mime_type: non_empty(enc.mime_type()).map(String::from),
                length: enc.length().trim().parse().ok(),
            })
        });

    EpisodeEntry {
        title: item
            .title()
            .and_then(non_empty)
            .map(String::from)
            .unwrap_or_else(|| format!("episode_{}", index + 1)),
        description,
        published,
        link: item.link().unwrap_or_default().to_string(),
        author,
        tags: item
            .categories()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        duration: itunes
            .and_then(|ext| ext.duration())
            .unwrap_or_default()
            .to_string(),
        episode_number: itunes.and_then(|ext| ext.episode().and_then(|e| e.trim().parse().ok())),
        season_number: itunes.and_then(|ext| ext.season().and_then(|s| s.trim().parse().ok())),
        explicit: itunes
            .and_then(|ext| ext.explicit())
            .is_some_and(is_explicit),
        image_url: itunes
            .and_then(|ext| ext.image())
            .unwrap_or_default()
            .to_string(),
        guid: item
            .guid()
            .and_then(|g| non_empty(g.value()))
            .map(String::from),
        enclosure,
    }
}

fn from_syndication(feed: &feed_rs::model::Feed, feed_url: &str) -> ParsedFeed {
    let podcast = Podcast {
        title: text_content(&feed.title)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Unknown Podcast".to_string()),
        description: text_content(&feed.description)
            .map(|d| clean_html_text(&d))
            .unwrap_or_default(),
        link: feed
            .links
            .iter()
            .find(|l| l.rel.as_deref() != Some("self"))
            .map(|l| l.href.clone())
            .unwrap_or_default(),
        language: feed.language.clone().unwrap_or_default(),
        author: feed
            .authors
            .first()
            .map(|p| p.name.clone())
            .unwrap_or_default(),
        image_url: feed
            .logo
            .as_ref()
            .or(feed.icon.as_ref())
            .map(|img| img.uri.clone())
            .unwrap_or_default(),
        rights: text_content(&feed.rights).unwrap_or_default(),
        last_updated: feed.updated.map(|d| d.to_rfc3339()).unwrap_or_default(),
        feed_url: feed_url.to_string(),
    };

    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    for (index, item) in feed.entries.iter().enumerate() {
        let entry = entry_from_syndication(item, index);
        if entry.enclosure.is_some() {
            entries.push(entry);
        } else {
            warnings.push(FeedWarning::MissingEnclosure {
                index,
                title: entry.title,
            });
        }
    }

    ParsedFeed {
        podcast,
        entries,
        warnings,
    }
}

fn entry_from_syndication(item: &feed_rs::model::Entry, index: usize) -> EpisodeEntry {
    let enclosure = item
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("enclosure") && !l.href.is_empty())
        .map(|l| Enclosure {
            url: l.href.clone(),
            mime_type: l.media_type.clone(),
            length: l.length,
        })
        .or_else(|| {
            item.media
                .iter()
                .flat_map(|m| m.content.iter())
                .find_map(|c| {
                    c.url.as_ref().map(|url| Enclosure {
                        url: url.to_string(),
                        mime_type: c.content_type.as_ref().map(|m| m.to_string()),
                        length: c.size,
                    })
                })
        });

    let description = text_content(&item.summary)
        .or_else(|| item.content.as_ref().and_then(|c| c.body.clone()))
        .map(|d| clean_html_text(&d))
        .unwrap_or_default();

    EpisodeEntry {
        title: text_content(&item.title)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("episode_{}", index + 1)),
        description,
        published: item.published.or(item.updated).map(|d| d.fixed_offset()),
        link: item
            .links
            .iter()
            .find(|l| l.rel.as_deref() != Some("enclosure"))
            .map(|l| l.href.clone())
            .unwrap_or_default(),
        author: item
            .authors
            .first()
            .map(|p| p.name.clone())
            .unwrap_or_default(),
        tags: item.categories.iter().map(|c| c.term.clone()).collect(),
        duration: item
            .media
            .iter()
            .find_map(|m| m.duration)
            .map(format_duration)
            .unwrap_or_default(),
        episode_number: None,
        season_number: None,
        explicit: false,
        image_url: item
            .media
            .iter()
            .flat_map(|m| m.thumbnails.iter())
            .next()
            .map(|t| t.image.uri.clone())
            .unwrap_or_default(),
        guid: non_empty(&item.id).map(String::from),
        enclosure,
    }
}

fn text_content(text: &Option<feed_rs::model::Text>) -> Option<String> {
    text.as_ref().map(|t| t.content.clone())
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn is_explicit(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "yes" | "true" | "explicit"
    )
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Parse an RFC 2822 date, falling back to formats seen in the wild
fn parse_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let date_str = date_str.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt);
    }

    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%a, %d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
}

/// Strip markup from a description and collapse its whitespace
pub fn clean_html_text(html: &str) -> String {
    let mut stripped = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                stripped.push(' ');
            }
            _ if !in_tag => stripped.push(c),
            _ => {}
        }
    }

    let decoded = html_escape::decode_html_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED_URL: &str = "https://example.com/feed.xml";

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Test Podcast</title>
    <description><![CDATA[<p>A test podcast &amp; more</p>]]></description>
    <link>https://example.com</link>
    <language>en-us</language>
    <copyright>2024 Example</copyright>
    <lastBuildDate>Tue, 02 Jan 2024 08:00:00 +0000</lastBuildDate>
    <itunes:author>Test Author</itunes:author>
    <itunes:image href="https://example.com/image.jpg"/>
    <item>
      <title>Episode 1</title>
      <description>First episode</description>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
      <link>https://example.com/ep1</link>
      <category>Tech</category>
      <category>Interviews</category>
      <guid>ep1-guid</guid>
      <enclosure url="https://example.com/ep1.mp3" length="1234567" type="audio/mpeg"/>
      <itunes:duration>30:00</itunes:duration>
      <itunes:episode>1</itunes:episode>
      <itunes:season>2</itunes:season>
      <itunes:explicit>yes</itunes:explicit>
      <itunes:image href="https://example.com/ep1.jpg"/>
    </item>
    <item>
      <title>Episode 2</title>
      <enclosure url="https://example.com/ep2.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    const ATOM_FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Cast</title>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2024-01-02T08:00:00Z</updated>
  <author><name>Atom Author</name></author>
  <link href="https://atom.example.com/"/>
  <entry>
    <title>Atom Episode</title>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2024-01-01T12:00:00Z</updated>
    <summary>Summary text</summary>
    <link rel="alternate" href="https://atom.example.com/ep1"/>
    <link rel="enclosure" type="audio/mpeg" length="42" href="https://atom.example.com/ep1.mp3"/>
  </entry>
  <entry>
    <title>Text Only</title>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6b</id>
    <updated>2024-01-01T12:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn parse_feed_extracts_podcast_metadata() {
        let parsed = parse_feed(SAMPLE_FEED.as_bytes(), FEED_URL);
        let podcast = parsed.podcast;

        assert_eq!(podcast.title, "Test Podcast");
        assert_eq!(podcast.description, "A test podcast & more");
        assert_eq!(podcast.link, "https://example.com");
        assert_eq!(podcast.language, "en-us");
        assert_eq!(podcast.author, "Test Author");
        assert_eq!(podcast.image_url, "https://example.com/image.jpg");
        assert_eq!(podcast.rights, "2024 Example");
        assert_eq!(podcast.last_updated, "Tue, 02 Jan 2024 08:00:00 +0000");
        assert_eq!(podcast.feed_url, FEED_URL);
    }

    #[test]
    fn parse_feed_extracts_episodes() {
        let parsed = parse_feed(SAMPLE_FEED.as_bytes(), FEED_URL);

        assert_eq!(parsed.entries.len(), 2);
        assert!(parsed.warnings.is_empty());

        let ep1 = &parsed.entries[0];
        assert_eq!(ep1.title, "Episode 1");
        assert_eq!(ep1.guid.as_deref(), Some("ep1-guid"));
        assert_eq!(ep1.link, "https://example.com/ep1");
        assert_eq!(ep1.tags, vec!["Tech", "Interviews"]);
        assert_eq!(ep1.duration, "30:00");
        assert_eq!(ep1.episode_number, Some(1));
        assert_eq!(ep1.season_number, Some(2));
        assert!(ep1.explicit);
        assert_eq!(ep1.image_url, "https://example.com/ep1.jpg");
        assert!(ep1.published.is_some());

        let enclosure = ep1.enclosure.as_ref().unwrap();
        assert_eq!(enclosure.url, "https://example.com/ep1.mp3");
        assert_eq!(enclosure.length, Some(1234567));
        assert_eq!(enclosure.mime_type.as_deref(), Some("audio/mpeg"));
    }

    #[test]
    fn parse_feed_defaults_missing_optional_fields() {
        let parsed = parse_feed(SAMPLE_FEED.as_bytes(), FEED_URL);

        let ep2 = &parsed.entries[1];
        assert_eq!(ep2.title, "Episode 2");
        assert!(ep2.guid.is_none());
        assert!(ep2.published.is_none());
        assert_eq!(ep2.duration, "");
        assert!(ep2.tags.is_empty());
        assert!(ep2.episode_number.is_none());
        assert!(!ep2.explicit);
    }

    #[test]
    fn parse_feed_drops_items_without_enclosure() {
        let feed = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <description>Test</description>
    <item>
      <title>Good One</title>
      <enclosure url="https://example.com/1.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>No Audio</title>
    </item>
    <item>
      <title>Good Two</title>
      <enclosure url="https://example.com/2.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

        let parsed = parse_feed(feed.as_bytes(), FEED_URL);

        let titles: Vec<_> = parsed.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Good One", "Good Two"]);
        assert_eq!(
            parsed.warnings,
            vec![FeedWarning::MissingEnclosure {
                index: 1,
                title: "No Audio".to_string()
            }]
        );
    }

    #[test]
    fn parse_feed_names_untitled_entries_by_position() {
        let feed = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <description>Test</description>
    <item>
      <enclosure url="https://example.com/1.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

        let parsed = parse_feed(feed.as_bytes(), FEED_URL);
        assert_eq!(parsed.entries[0].title, "episode_1");
    }

    #[test]
    fn parse_feed_reads_atom() {
        let parsed = parse_feed(ATOM_FEED.as_bytes(), FEED_URL);

        assert_eq!(parsed.podcast.title, "Atom Cast");
        assert_eq!(parsed.podcast.author, "Atom Author");
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.warnings.len(), 1);

        let entry = &parsed.entries[0];
        assert_eq!(entry.title, "Atom Episode");
        assert_eq!(entry.description, "Summary text");
        assert_eq!(entry.link, "https://atom.example.com/ep1");
        assert!(entry.published.is_some());
        assert_eq!(
            entry.enclosure.as_ref().map(|e| e.url.as_str()),
            Some("https://atom.example.com/ep1.mp3")
        );
    }

    #[test]
    fn parse_feed_is_soft_on_garbage() {
        let parsed = parse_feed(b"this is not xml at all", FEED_URL);

        assert!(parsed.entries.is_empty());
        assert_eq!(parsed.podcast.feed_url, FEED_URL);
        assert!(matches!(
            parsed.warnings.as_slice(),
            [FeedWarning::Malformed { .. }]
        ));
    }

    #[test]
    fn atom_entry_without_id_has_no_guid() {
        let feed = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Cast</title>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2024-01-02T08:00:00Z</updated>
  <entry>
    <title>No Id</title>
    <updated>2024-01-01T12:00:00Z</updated>
    <link rel="alternate" href="https://atom.example.com/ep1"/>
    <link rel="enclosure" type="audio/mpeg" href="https://atom.example.com/ep1.mp3"/>
  </entry>
</feed>"#;

        let parsed = parse_feed(feed.as_bytes(), FEED_URL);

        let entry = &parsed.entries[0];
        assert_eq!(entry.guid, None);
        assert!(matches!(
            crate::identity::identity(entry),
            Some(crate::identity::IdentityKey::UrlHash(_))
        ));
    }

    #[test]
    fn parse_feed_keeps_entries_around_a_broken_one() {
        let feed = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Half Broken</title>
    <item>
      <title>Good One</title>
      <guid>good-1</guid>
      <enclosure url="https://example.com/good1.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>Bad <b>bold</title>
      <guid>bad</guid>
      <enclosure url="https://example.com/bad.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>Good Two</title>
      <guid>good-2</guid>
      <enclosure url="https://example.com/good2.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

        let parsed = parse_feed(feed.as_bytes(), FEED_URL);

        let titles: Vec<&str> = parsed.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["Good One", "Good Two"]);
        assert_eq!(parsed.podcast.title, "Half Broken");
        assert!(matches!(
            parsed.warnings.as_slice(),
            [FeedWarning::Malformed { .. }]
        ));
    }

    #[test]
    fn clean_html_strips_tags_and_entities() {
        assert_eq!(
            clean_html_text("<p>Hello&nbsp;<b>world</b></p>\n\n<br/>&lt;3"),
            "Hello world <3"
        );
        assert_eq!(clean_html_text(""), "");
    }

    #[test]
    fn parse_date_accepts_common_variants() {
        assert!(parse_date("Mon, 01 Jan 2024 12:00:00 +0000").is_some());
        assert!(parse_date("2024-01-01T12:00:00+02:00").is_some());
        assert!(parse_date("Mon, 01 Jan 2024 12:00 +0000").is_some());
        assert!(parse_date("yesterday").is_none());
    }
}
