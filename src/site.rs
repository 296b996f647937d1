use std::sync::OnceLock;

use anyhow::Context as _;
use scraper::{ElementRef, Html, Selector};
use sha2::Digest as _;
use url::Url;

use crate::formats::{BookMeta, ChapterDescriptor};

pub const DEFAULT_BASE_URL: &str = "https://www.69shuba.com";

/// Site-specific markup knowledge: where pages live and how to read them.
pub trait Site: Send + Sync {
    fn book_url(&self, book_id: &str) -> String;
    fn catalog_url(&self, book_id: &str) -> String;

    fn book_ready_selector(&self) -> Option<&str> {
        None
    }
    fn catalog_ready_selector(&self) -> Option<&str> {
        None
    }
    fn chapter_ready_selector(&self) -> Option<&str> {
        None
    }

    fn parse_book(&self, html: &str) -> Option<BookMeta>;
    fn parse_chapters(&self, html: &str) -> Vec<ChapterDescriptor>;

    /// Plain chapter text, or `None` when the content region is absent or empty.
    fn extract(&self, html: &str, chapter_title: &str) -> Option<String>;
}

const UNKNOWN_NAME: &str = "未知书名";
const UNKNOWN_AUTHOR: &str = "未知作者";
const NO_DESCRIPTION: &str = "暂无简介";

const CHAPTER_LINK_SELECTORS: &[&str] = &[
    ".catalog ul li a",
    ".listmain dd a",
    "#list dl dd a",
    ".chapterlist a",
    "a[href*=\"/txt/\"]",
];

const CONTENT_SELECTORS: &[&str] = &[".txtnav", "#content", ".content", "#txtContent"];

const SKIPPED_BLOCK_CLASSES: &[&str] = &["readinline", "readpage", "readpage2"];

const BOILERPLATE: &[&str] = &[
    "章节错误",
    "举报",
    "加入书签",
    "www.69shuba.com",
    "69书吧",
    "请记住本站",
    "本章未完",
    "点击下一页",
    "()",
    "(本章完)",
    "手机用户请浏览",
    "更好的阅读体验",
    "最新网址",
    "最新章节",
    "手机阅读",
];

struct Selectors {
    book_nav: Selector,
    book_name: Selector,
    small: Selector,
    book_author: Selector,
    book_description: Selector,
    chapter_links: Vec<Selector>,
    content: Vec<Selector>,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| {
        let parse = |css: &str| Selector::parse(css).expect("static CSS selector is valid");
        Selectors {
            book_nav: parse(".booknav2"),
            book_name: parse(".booknav2 h1"),
            small: parse("small"),
            book_author: parse(".booknav2 p"),
            book_description: parse(".navtxt p"),
            chapter_links: CHAPTER_LINK_SELECTORS.iter().map(|css| parse(*css)).collect(),
            content: CONTENT_SELECTORS.iter().map(|css| parse(*css)).collect(),
        }
    })
}

/// Markup heuristics for 69shuba-style novel sites.
#[derive(Debug, Clone)]
pub struct ShubaSite {
    base_url: Url,
}

impl ShubaSite {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("parse base url")?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            anyhow::bail!("base url must be http/https: {base_url}");
        }
        Ok(Self { base_url })
    }

    fn base(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }
}

impl Site for ShubaSite {
    fn book_url(&self, book_id: &str) -> String {
        format!("{}/book/{book_id}.htm", self.base())
    }

    fn catalog_url(&self, book_id: &str) -> String {
        format!("{}/book/{book_id}/", self.base())
    }

    fn book_ready_selector(&self) -> Option<&str> {
        Some(".booknav2")
    }

    fn catalog_ready_selector(&self) -> Option<&str> {
        Some(".catalog")
    }

    fn chapter_ready_selector(&self) -> Option<&str> {
        Some(".txtnav")
    }

    fn parse_book(&self, html: &str) -> Option<BookMeta> {
        let sel = selectors();
        let document = Html::parse_document(html);
        document.select(&sel.book_nav).next()?;

        let name = document
            .select(&sel.book_name)
            .next()
            .map(|h1| {
                let full = h1.text().collect::<String>();
                let small = h1
                    .select(&sel.small)
                    .flat_map(|el| el.text())
                    .collect::<String>();
                let name = if small.is_empty() {
                    full
                } else {
                    full.replacen(&small, "", 1)
                };
                name.trim().to_owned()
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_NAME.to_owned());

        let author = first_text(&document, &sel.book_author)
            .map(|text| text.replace("作者：", "").trim().to_owned())
            .filter(|author| !author.is_empty())
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_owned());

        let description = first_text(&document, &sel.book_description)
            .unwrap_or_else(|| NO_DESCRIPTION.to_owned());

        Some(BookMeta {
            name,
            author,
            description,
        })
    }

    fn parse_chapters(&self, html: &str) -> Vec<ChapterDescriptor> {
        let document = Html::parse_document(html);
        let links = selectors()
            .chapter_links
            .iter()
            .map(|selector| document.select(selector).collect::<Vec<_>>())
            .find(|links| !links.is_empty())
            .unwrap_or_default();

        let mut chapters = Vec::new();
        for link in links {
            let title = link.text().collect::<String>().trim().to_owned();
            let href = link.value().attr("href").unwrap_or_default().trim();
            if title.is_empty() || href.is_empty() {
                continue;
            }
            let Ok(url) = self.base_url.join(href) else {
                tracing::debug!(href, "skipping unresolvable chapter link");
                continue;
            };
            chapters.push(ChapterDescriptor {
                id: chapter_id(href, url.as_str()),
                title,
                url: url.to_string(),
                index: chapters.len(),
            });
        }
        chapters
    }

    fn extract(&self, html: &str, chapter_title: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let region = selectors()
            .content
            .iter()
            .find_map(|selector| document.select(selector).next())?;

        let mut fragments = Vec::new();
        collect_text(region, &mut fragments);

        let chapter_title = chapter_title.trim();
        let mut title_seen = 0_usize;
        let mut paragraphs = Vec::new();
        for text in fragments {
            if !chapter_title.is_empty() && text.starts_with(chapter_title) {
                title_seen += 1;
                if title_seen > 1 {
                    continue;
                }
            }
            if is_bare_date(&text) {
                continue;
            }
            if text.starts_with("作者：") || text.starts_with("作者:") {
                continue;
            }
            if BOILERPLATE.iter().any(|phrase| text.contains(phrase)) {
                continue;
            }
            paragraphs.push(text);
        }

        if paragraphs.is_empty() {
            return None;
        }
        Some(paragraphs.join("\n"))
    }
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_owned())
        .filter(|text| !text.is_empty())
}

fn collect_text(element: ElementRef<'_>, out: &mut Vec<String>) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let text = text.trim();
            if !text.is_empty() {
                out.push(text.to_owned());
            }
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        if is_skipped_element(child) {
            continue;
        }
        collect_text(child, out);
    }
}

fn is_skipped_element(element: ElementRef<'_>) -> bool {
    let value = element.value();
    match value.name() {
        "script" | "style" => true,
        "div" | "p" => value
            .classes()
            .any(|class| SKIPPED_BLOCK_CLASSES.contains(&class)),
        _ => false,
    }
}

fn is_bare_date(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Last path segment of the link without its `.html` suffix; falls back to a
/// digest of the resolved URL.
fn chapter_id(href: &str, resolved_url: &str) -> String {
    let path = href.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_end_matches('/');
    let last = path.rsplit('/').next().unwrap_or_default();
    let last = last
        .strip_suffix(".html")
        .or_else(|| last.strip_suffix(".htm"))
        .unwrap_or(last);
    if !last.is_empty() {
        return last.to_owned();
    }

    let digest = sha2::Sha256::digest(resolved_url.as_bytes());
    format!("c_{}", &hex::encode(digest)[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> ShubaSite {
        ShubaSite::new("https://books.example.com").unwrap()
    }

    #[test]
    fn urls_follow_site_layout() {
        let site = site();
        assert_eq!(site.book_url("123"), "https://books.example.com/book/123.htm");
        assert_eq!(site.catalog_url("123"), "https://books.example.com/book/123/");
    }

    #[test]
    fn rejects_non_http_base_url() {
        assert!(ShubaSite::new("ftp://books.example.com").is_err());
    }

    #[test]
    fn parse_book_strips_small_tag_and_author_prefix() {
        let html = r#"<html><body>
            <div class="booknav2">
              <h1>星海归途 <small>连载中</small></h1>
              <p>作者：青木</p>
            </div>
            <div class="navtxt"><p>一段简介。</p></div>
        </body></html>"#;

        let meta = site().parse_book(html).unwrap();
        assert_eq!(meta.name, "星海归途");
        assert_eq!(meta.author, "青木");
        assert_eq!(meta.description, "一段简介。");
    }

    #[test]
    fn parse_book_uses_defaults_for_missing_fields() {
        let html = r#"<div class="booknav2"></div>"#;
        let meta = site().parse_book(html).unwrap();
        assert_eq!(meta.name, UNKNOWN_NAME);
        assert_eq!(meta.author, UNKNOWN_AUTHOR);
        assert_eq!(meta.description, NO_DESCRIPTION);
    }

    #[test]
    fn parse_book_requires_book_region() {
        assert!(site().parse_book("<html><body>blocked</body></html>").is_none());
    }

    #[test]
    fn parse_chapters_resolves_links_and_ids() {
        let html = r#"<div class="catalog"><ul>
            <li><a href="https://books.example.com/txt/9/100.html">第一章</a></li>
            <li><a href="/txt/9/101.html">第二章</a></li>
            <li><a href="txt/9/102">第三章</a></li>
            <li><a href="/txt/9/103.html"> </a></li>
        </ul></div>"#;

        let chapters = site().parse_chapters(html);
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].id, "100");
        assert_eq!(chapters[1].url, "https://books.example.com/txt/9/101.html");
        assert_eq!(chapters[2].url, "https://books.example.com/txt/9/102");
        assert_eq!(chapters[2].id, "102");
        let indices = chapters.iter().map(|c| c.index).collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn parse_chapters_falls_back_to_later_selectors() {
        let html = r#"<div class="listmain"><dl><dd><a href="/txt/1/5.html">Five</a></dd></dl></div>"#;
        let chapters = site().parse_chapters(html);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].id, "5");
    }

    #[test]
    fn chapter_id_falls_back_to_digest() {
        let id = chapter_id("/", "https://books.example.com/");
        assert!(id.starts_with("c_"));
        assert_eq!(id.len(), 18);
    }

    #[test]
    fn extract_filters_noise() {
        let html = r#"<html><body><div class="txtnav">
            <h1>第一章 启程</h1>
            <div class="txtinfo">2024-01-05</div>
            <p>作者：青木</p>
            <script>var ad = 1;</script>
            <div class="readinline">加入书签</div>
            第一章 启程
            <p>清晨的港口很安静。</p>
            <p>请记住本站域名</p>
            <p>他登上了船。</p>
        </div></body></html>"#;

        let text = site().extract(html, "第一章 启程").unwrap();
        assert_eq!(text, "第一章 启程\n清晨的港口很安静。\n他登上了船。");
    }

    #[test]
    fn extract_returns_none_without_content_region() {
        let html = "<html><body><p>nothing here</p></body></html>";
        assert!(site().extract(html, "x").is_none());
    }

    #[test]
    fn extract_returns_none_when_only_noise_remains() {
        let html = r#"<div id="content"><p>(本章完)</p></div>"#;
        assert!(site().extract(html, "x").is_none());
    }

    #[test]
    fn bare_date_detection() {
        assert!(is_bare_date("2024-01-05"));
        assert!(!is_bare_date("2024-01-05 12:00"));
        assert!(!is_bare_date("第2024-01章"));
    }
}
