use std::io::Write as _;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use archiscribe::config::Endpoints;

/// One canned response. A route matches when the request path equals `path`
/// and, if set, the raw query string contains `query`.
#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub query: Option<String>,
    pub status: u16,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl Route {
    pub fn ok(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            query: None,
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(path: impl Into<String>, status: u16) -> Self {
        Self {
            path: path.into(),
            query: None,
            status,
            body: Vec::new(),
        }
    }

    pub fn with_query(mut self, fragment: impl Into<String>) -> Self {
        self.query = Some(fragment.into());
        self
    }
}

/// Local stand-in for the archive and IIIF services. Unknown paths get 404.
pub struct ArchiveStub {
    pub base_url: String,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ArchiveStub {
    pub fn spawn(routes: Vec<Route>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start archive stub server");
        let base_url = format!("http://{}", server.server_addr());
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let raw = request.url().to_string();
                let (path, query) = raw.split_once('?').unwrap_or((raw.as_str(), ""));
                let route = routes.iter().find(|route| {
                    route.path == path
                        && route
                            .query
                            .as_deref()
                            .is_none_or(|fragment| query.contains(fragment))
                });
                let response = match route {
                    Some(route) => tiny_http::Response::from_data(route.body.clone())
                        .with_status_code(route.status)
                        .with_chunked_threshold(usize::MAX),
                    None => tiny_http::Response::from_data(b"not found".to_vec())
                        .with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(self.base_url.clone(), format!("{}/iiif", self.base_url))
    }
}

impl Drop for ArchiveStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Builds a gzip-compressed OCR export. Each page is `(width, height,
/// boxes)` with boxes as `(l, t, r, b)`.
#[allow(dead_code)]
pub fn ocr_export(pages: &[(u32, u32, Vec<(u32, u32, u32, u32)>)]) -> Vec<u8> {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<document>\n");
    for (width, height, boxes) in pages {
        xml.push_str(&format!(
            "<page width=\"{width}\" height=\"{height}\" resolution=\"400\">\n"
        ));
        for (l, t, r, b) in boxes {
            xml.push_str(&format!(
                "<line baseline=\"{b}\" l=\"{l}\" t=\"{t}\" r=\"{r}\" b=\"{b}\"><formatting lang=\"German\">x</formatting></line>\n"
            ));
        }
        xml.push_str("</page>\n");
    }
    xml.push_str("</document>\n");

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(xml.as_bytes()).expect("gzip ocr export");
    encoder.finish().expect("finish gzip ocr export")
}

/// Ten front-matter pages followed by `body_pages` pages with one wide line
/// each, all 2000x3000.
#[allow(dead_code)]
pub fn simple_export(body_pages: usize) -> Vec<u8> {
    let mut pages = Vec::new();
    for _ in 0..10 {
        pages.push((2000, 3000, vec![(100, 100, 1500, 150)]));
    }
    for idx in 0..body_pages {
        let top = 200 + idx as u32;
        pages.push((2000, 3000, vec![(100, top, 1500, top + 50)]));
    }
    ocr_export(&pages)
}

/// Ten front-matter pages and one body page with `lines` lines of random hex
/// text, so the gzip stays large and arrives in many chunks. `trailer` is
/// inserted verbatim before the closing tag.
#[allow(dead_code)]
pub fn bulky_export(lines: usize, trailer: &str) -> Vec<u8> {
    use rand::RngCore as _;

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<document>\n");
    for _ in 0..10 {
        xml.push_str("<page width=\"2000\" height=\"3000\" resolution=\"400\">\n</page>\n");
    }
    xml.push_str("<page width=\"2000\" height=\"60000\" resolution=\"400\">\n");
    let mut rng = rand::thread_rng();
    let mut noise = [0_u8; 32];
    for idx in 0..lines {
        rng.fill_bytes(&mut noise);
        let top = 100 + idx;
        let bottom = top + 40;
        xml.push_str(&format!(
            "<line baseline=\"{bottom}\" l=\"100\" t=\"{top}\" r=\"1500\" b=\"{bottom}\"><formatting lang=\"German\">{}</formatting></line>\n",
            hex::encode(noise)
        ));
    }
    xml.push_str("</page>\n");
    xml.push_str(trailer);
    xml.push_str("</document>\n");

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(xml.as_bytes()).expect("gzip ocr export");
    encoder.finish().expect("finish gzip ocr export")
}
