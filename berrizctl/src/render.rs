//! Minimal built-in HTML rendering for posts and notices. Anything fancier
//! belongs to an external template.

use berriz_core::{NoticeDetail, PostItem, PostRenderer};

pub struct BasicRenderer;

impl PostRenderer for BasicRenderer {
    fn render_post(&self, post: &PostItem, translations: &[serde_json::Value]) -> String {
        let title = escape(post.title.as_deref().unwrap_or(&post.post_id));
        let body = post.body.as_deref().unwrap_or_default();
        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">");
        html.push_str(&format!("<title>{title}</title></head><body>\n"));
        html.push_str(&format!("<h1>{title}</h1>\n"));
        if let Some(at) = post.published_at {
            html.push_str(&format!("<p class=\"published\">{}</p>\n", at.to_rfc3339()));
        }
        html.push_str(&format!("<div class=\"body\">{body}</div>\n"));
        for (index, url) in post.image_urls.iter().enumerate() {
            html.push_str(&format!(
                "<img class=\"inline\" alt=\"image {index}\" src=\"{}\">\n",
                escape(url)
            ));
        }
        if !translations.is_empty() {
            html.push_str("<hr>\n");
            for translation in translations {
                if let Some(language) = translation.get("languageCode").and_then(|v| v.as_str()) {
                    let text = translation
                        .get("body")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    html.push_str(&format!(
                        "<div class=\"translation\" lang=\"{language}\">{}</div>\n",
                        escape(text)
                    ));
                }
            }
        }
        html.push_str("</body></html>\n");
        html
    }

    fn render_notice(&self, notice: &NoticeDetail) -> String {
        let title = escape(notice.title.as_deref().unwrap_or("notice"));
        let body = notice.body.as_deref().unwrap_or_default();
        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">");
        html.push_str(&format!("<title>{title}</title></head><body>\n"));
        html.push_str(&format!("<h1>{title}</h1>\n"));
        if let Some(at) = notice.published_at {
            html.push_str(&format!("<p class=\"published\">{}</p>\n", at.to_rfc3339()));
        }
        html.push_str(&format!("<div class=\"body\">{body}</div>\n"));
        html.push_str("</body></html>\n");
        html
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn post_html_contains_title_and_images() {
        let post = PostItem {
            post_id: "p-1".into(),
            title: Some("hello <world>".into()),
            body: Some("<p>content</p>".into()),
            published_at: Some(Utc::now()),
            image_urls: vec!["https://cdn.example/a.jpg".into()],
        };
        let html = BasicRenderer.render_post(&post, &[]);
        assert!(html.contains("hello &lt;world&gt;"));
        assert!(html.contains("https://cdn.example/a.jpg"));
        assert!(html.contains("<p>content</p>"));
    }

    #[test]
    fn notice_html_renders_body_verbatim() {
        let notice = NoticeDetail {
            notice_id: 9,
            title: Some("maintenance".into()),
            body: Some("<b>tonight</b>".into()),
            published_at: None,
        };
        let html = BasicRenderer.render_notice(&notice);
        assert!(html.contains("<b>tonight</b>"));
        assert!(html.contains("maintenance"));
    }
}
