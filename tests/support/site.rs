//! Mock gallery site: front page, listing pages, show page, `showpage` API
//! and an image host on a separate server.

use std::ops::RangeInclusive;

use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const GALLERY_TOKEN: &str = "abcdef0123";
pub const SHOW_KEY: &str = "showkey0001";
pub const BAN_NOTICE: &str = "<html><body>Your IP address has been temporarily banned for \
    excessive pageloads. The ban expires in 2 hours and 15 minutes</body></html>";

/// Image key the mock site assigns to `page`.
pub fn image_key(page: u32) -> String {
    format!("{page:010x}")
}

/// Bytes served for `page` of gallery `gid`.
pub fn image_body(gid: u64, page: u32) -> Vec<u8> {
    format!("image {gid}-{page}").into_bytes()
}

pub fn gallery_path(gid: u64) -> String {
    format!("/g/{gid}/{GALLERY_TOKEN}/")
}

pub fn gallery_address(server: &MockServer, gid: u64) -> String {
    format!("{}{}", server.uri(), gallery_path(gid))
}

pub fn front_page(title: &str, pages: u32) -> String {
    format!(
        r#"<html><body>
        <div id="gd1"><div style="width:250px; background:transparent url(/t/{title}.jpg) no-repeat"></div></div>
        <div id="gd2"><h1 id="gn">{title}</h1><h1 id="gj"></h1></div>
        <table>
          <tr><td class="gdt1">File Size:</td><td class="gdt2">1.5 MiB</td></tr>
          <tr><td class="gdt1">Length:</td><td class="gdt2">{pages} pages</td></tr>
        </table></body></html>"#
    )
}

pub fn listing_page(base: &str, gid: u64, pages: RangeInclusive<u32>) -> String {
    let mut html = String::from(r#"<div id="gdt">"#);
    for page in pages {
        html.push_str(&format!(
            r#"<div class="gdtm"><a href="{base}/s/{}/{gid}-{page}"><img alt="{page}"></a></div>"#,
            image_key(page)
        ));
    }
    html.push_str("</div>");
    html
}

pub fn show_page(gid: u64) -> String {
    format!(
        r#"<html><head><script type="text/javascript" src="/z/ehg.js"></script>
        <script type="text/javascript">var gid={gid}; var startpage=1; var showkey="{SHOW_KEY}";</script>
        </head><body></body></html>"#
    )
}

/// Mounts front page, every listing page and the page-1 show page.
pub async fn mount_gallery(server: &MockServer, gid: u64, title: &str, pages: u32) {
    let gallery = gallery_path(gid);
    Mock::given(method("GET"))
        .and(path(gallery.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(front_page(title, pages)))
        .with_priority(10)
        .mount(server)
        .await;

    for (index, chunk_start) in (1..=pages).step_by(40).enumerate() {
        let chunk_end = (chunk_start + 39).min(pages);
        Mock::given(method("GET"))
            .and(path(gallery.as_str()))
            .and(query_param("p", index.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(
                &server.uri(),
                gid,
                chunk_start..=chunk_end,
            )))
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path(format!("/s/{}/{gid}-1", image_key(1))))
        .respond_with(ResponseTemplate::new(200).set_body_string(show_page(gid)))
        .mount(server)
        .await;
}

/// `showpage` API answering with links onto `image_host`.
///
/// Pages listed in `quota_pages` get the quota placeholder instead.
pub struct ShowPageApi {
    pub image_host: String,
    pub quota_pages: Vec<u32>,
}

impl Respond for ShowPageApi {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = serde_json::from_slice::<serde_json::Value>(&request.body) else {
            return ResponseTemplate::new(400);
        };
        let gid = body["gid"].as_u64().unwrap_or_default();
        let page = body["page"]
            .as_u64()
            .and_then(|p| u32::try_from(p).ok())
            .unwrap_or_default();
        if body["showkey"] != SHOW_KEY || body["imgkey"] != image_key(page).as_str() {
            return ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "error": "Key mismatch" }));
        }
        let response = if self.quota_pages.contains(&page) {
            serde_json::json!({
                "p": page,
                "i3": r#"<a href="/s/x"><img id="img" src="https://site.example/img/509.gif"></a>"#,
            })
        } else {
            let url = format!("{}/img/{gid}/{page}.jpg", self.image_host);
            serde_json::json!({
                "p": page,
                "i3": format!(r#"<img id="img" src="{url}?displayed=1">"#),
                "i7": format!(r#"<a href="{url}">Download original</a>"#),
            })
        };
        ResponseTemplate::new(200).set_body_json(response)
    }
}

pub async fn mount_showpage_api(server: &MockServer, image_host: &MockServer, quota_pages: Vec<u32>) {
    mount_showpage_api_at(server, image_host.uri(), quota_pages).await;
}

/// Like [`mount_showpage_api`] for an image host that is not a wiremock server.
pub async fn mount_showpage_api_at(server: &MockServer, image_host: String, quota_pages: Vec<u32>) {
    Mock::given(method("POST"))
        .and(path("/api.php"))
        .respond_with(ShowPageApi {
            image_host,
            quota_pages,
        })
        .mount(server)
        .await;
}

struct ImageResponder;

impl Respond for ImageResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut parts = request.url.path().trim_start_matches("/img/").split('/');
        let gid = parts.next().and_then(|s| s.parse::<u64>().ok());
        let page = parts
            .next()
            .and_then(|s| s.trim_end_matches(".jpg").parse::<u32>().ok());
        match (gid, page) {
            (Some(gid), Some(page)) => ResponseTemplate::new(200).set_body_bytes(image_body(gid, page)),
            _ => ResponseTemplate::new(404),
        }
    }
}

/// Serves `/img/<gid>/<page>.jpg` with [`image_body`].
pub async fn mount_images(image_host: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/img/\d+/\d+\.jpg$"))
        .respond_with(ImageResponder)
        .mount(image_host)
        .await;
}
