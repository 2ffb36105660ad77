//! Feed documents for integration tests.

pub const SOURCE_URL: &str = "https://feeds.example.com/jobs.xml";
pub const SOURCE_NAME: &str = "example";

/// One RSS item. `None` leaves the element out entirely.
pub struct RssItem<'a> {
    pub guid: Option<&'a str>,
    pub title: Option<&'a str>,
    pub link: Option<&'a str>,
    pub company: Option<&'a str>,
}

impl<'a> RssItem<'a> {
    pub fn new(guid: &'a str, title: &'a str) -> Self {
        Self {
            guid: Some(guid),
            title: Some(title),
            link: Some("https://jobs.example.com/listing"),
            company: None,
        }
    }

    pub fn untitled(guid: &'a str) -> Self {
        Self {
            title: None,
            ..Self::new(guid, "")
        }
    }

    pub fn company(mut self, company: &'a str) -> Self {
        self.company = Some(company);
        self
    }

    fn to_xml(&self) -> String {
        let mut xml = String::from("<item>");
        if let Some(guid) = self.guid {
            xml.push_str(&format!("<guid isPermaLink=\"false\">{}</guid>", guid));
        }
        if let Some(title) = self.title {
            xml.push_str(&format!("<title>{}</title>", title));
        }
        if let Some(link) = self.link {
            xml.push_str(&format!("<link>{}/{}</link>", link, self.guid.unwrap_or("x")));
        }
        if let Some(company) = self.company {
            xml.push_str(&format!("<dc:creator>{}</dc:creator>", company));
        }
        xml.push_str("<pubDate>Mon, 02 Jun 2025 09:30:00 +0000</pubDate>");
        xml.push_str("<category>Engineering</category>");
        xml.push_str("</item>");
        xml
    }
}

pub fn rss_feed(items: &[RssItem<'_>]) -> String {
    let body: String = items.iter().map(RssItem::to_xml).collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Example Jobs</title>
    {}
  </channel>
</rss>"#,
        body
    )
}

/// `count` valid items with guids `job-0..job-{count-1}`.
pub fn numbered_rss_feed(count: usize) -> String {
    let guids: Vec<String> = (0..count).map(|i| format!("job-{}", i)).collect();
    let titles: Vec<String> = (0..count).map(|i| format!("Engineer {}", i)).collect();
    let items: Vec<RssItem<'_>> = guids
        .iter()
        .zip(&titles)
        .map(|(guid, title)| RssItem::new(guid, title))
        .collect();
    rss_feed(&items)
}

pub fn atom_feed() -> String {
    r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Jobs</title>
  <entry>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <title>Platform Engineer</title>
    <link rel="alternate" href="https://jobs.example.com/atom/1"/>
    <author><name>Acme Corp</name></author>
    <updated>2025-06-02T09:30:00Z</updated>
    <category term="Infrastructure"/>
    <summary>Keep the lights on.</summary>
  </entry>
  <entry>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6b</id>
    <title>Data Engineer</title>
    <link href="https://jobs.example.com/atom/2"/>
  </entry>
</feed>"#
        .to_string()
}

pub fn rdf_feed() -> String {
    r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel><title>RDF Jobs</title></channel>
  <item>
    <title>Archivist</title>
    <link>https://jobs.example.com/rdf/1</link>
  </item>
</rdf:RDF>"#
        .to_string()
}
