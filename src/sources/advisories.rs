//! Advisory source client — HTML bulletins and RSS 2.0 news feeds

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use super::SourceError;

/// One RSS item of interest.
#[derive(Debug, Clone, Default)]
pub struct RssItem {
    pub title: String,
    pub description: String,
    pub link: String,
    pub pub_date: String,
}

impl RssItem {
    /// Title + description as a single text blob for parsing and dedup.
    pub fn text(&self) -> String {
        format!("{}. {}", self.title, self.description)
    }
}

pub struct AdvisoryClient {
    http: reqwest::Client,
    html_url: Option<String>,
    rss_url: Option<String>,
}

impl AdvisoryClient {
    pub fn new(html_url: Option<String>, rss_url: Option<String>, timeout_sec: u64) -> Self {
        Self { http: super::http_client(timeout_sec), html_url, rss_url }
    }

    /// Fetch the advisory page and reduce it to plain text (capped at 5000
    /// chars, matching the downstream parser's context budget).
    pub async fn fetch_advisory_text(&self) -> Result<Option<String>, SourceError> {
        let Some(url) = &self.html_url else { return Ok(None) };
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(SourceError::BadResponse(format!(
                "advisory endpoint returned {}",
                resp.status()
            )));
        }
        let html = resp.text().await?;
        let text = strip_html(&html);
        if text.len() < 50 {
            return Ok(None);
        }
        Ok(Some(text.chars().take(5000).collect()))
    }

    /// Fetch and parse the RSS 2.0 feed.
    pub async fn fetch_rss_items(&self) -> Result<Vec<RssItem>, SourceError> {
        let Some(url) = &self.rss_url else { return Ok(Vec::new()) };
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(SourceError::BadResponse(format!(
                "advisory RSS endpoint returned {}",
                resp.status()
            )));
        }
        let xml = resp.text().await?;
        parse_rss(&xml)
    }
}

/// Strip tags, scripts, and entities from an HTML page.
fn strip_html(html: &str) -> String {
    let no_scripts = Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
        .map(|re| re.replace_all(html, " ").into_owned())
        .unwrap_or_else(|_| html.to_string());
    let no_tags = Regex::new(r"<[^>]+>")
        .map(|re| re.replace_all(&no_scripts, " ").into_owned())
        .unwrap_or(no_scripts);
    let decoded = no_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&nbsp;", " ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse RSS 2.0 `<item>` elements.
fn parse_rss(xml: &str) -> Result<Vec<RssItem>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<RssItem> = None;
    let mut field: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                match name.as_str() {
                    "item" => current = Some(RssItem::default()),
                    "title" | "description" | "link" | "pubdate" if current.is_some() => {
                        field = Some(name);
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(item), Some(field_name)) = (current.as_mut(), field.as_deref()) {
                    let text = t.unescape().unwrap_or_default().to_string();
                    match field_name {
                        "title" => item.title.push_str(&text),
                        "description" => item.description.push_str(&text),
                        "link" => item.link.push_str(&text),
                        "pubdate" => item.pub_date.push_str(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if let (Some(item), Some(field_name)) = (current.as_mut(), field.as_deref()) {
                    let text = String::from_utf8_lossy(&t).to_string();
                    match field_name {
                        "title" => item.title.push_str(&text),
                        "description" => item.description.push_str(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                match name.as_str() {
                    "item" => {
                        if let Some(item) = current.take() {
                            items.push(item);
                        }
                    }
                    "title" | "description" | "link" | "pubdate" => field = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("rss parse error: {e}"))),
            _ => {}
        }
    }

    Ok(items)
}
