//! Shared helpers for the integration tests
#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use pdf_toolkit::{serve, AppState, ServerConfig};
use qpdf::{EncryptionParams, EncryptionParamsR6, PrintPermission, QPdf};
use reqwest::multipart::{Form, Part};
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Build a PDF with one page per `(width, height)`
pub fn pdf_with_pages(pages: &[(f32, f32)]) -> Vec<u8> {
    build_pdf(pages, &[], false)
}

/// Build a PDF with pages and a document information dictionary holding
/// the given `(key, value)` strings
pub fn pdf_with_info(pages: &[(f32, f32)], info: &[(&str, &str)]) -> Vec<u8> {
    build_pdf(pages, info, false)
}

/// Build a PDF whose MediaBox and Resources sit on the Pages node only, so
/// every page inherits them
pub fn pdf_with_inherited_attributes(pages: usize, size: (f32, f32)) -> Vec<u8> {
    build_pdf(&vec![size; pages], &[], true)
}

fn media_box((width, height): (f32, f32)) -> Object {
    vec![Object::Integer(0), Object::Integer(0), width.into(), height.into()].into()
}

fn build_pdf(pages: &[(f32, f32)], info: &[(&str, &str)], inherit: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources = dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    };

    let mut kids = Vec::new();
    for (i, &size) in pages.iter().enumerate() {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), Object::Integer(18)]),
                Operation::new("Td", vec![Object::Integer(10), Object::Integer(10)]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("page {}", i + 1))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        };
        if !inherit {
            page.set("Resources", resources.clone());
            page.set("MediaBox", media_box(size));
        }
        kids.push(doc.add_object(page).into());
    }

    let mut tree = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => pages.len() as i64,
    };
    if inherit {
        tree.set("Resources", resources);
        tree.set("MediaBox", media_box(pages.first().copied().unwrap_or((612.0, 792.0))));
    }
    doc.objects.insert(pages_id, Object::Dictionary(tree));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if !info.is_empty() {
        let mut dict = Dictionary::new();
        for &(key, value) in info {
            dict.set(key, Object::string_literal(value));
        }
        let info_id = doc.add_object(dict);
        doc.trailer.set("Info", info_id);
    }

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Encrypt with AES-256. An empty user password gives an owner-only
/// protected document that opens without a password.
pub fn encrypt(data: &[u8], user_password: &str, owner_password: &str) -> Vec<u8> {
    let qpdf = QPdf::read_from_memory(data).unwrap();
    let mut writer = qpdf.writer();
    writer
        .preserve_encryption(false)
        .encryption_params(EncryptionParams::R6(EncryptionParamsR6 {
            user_password: user_password.to_string(),
            owner_password: owner_password.to_string(),
            allow_accessibility: true,
            allow_extract: false,
            allow_assemble: false,
            allow_annotate_and_form: false,
            allow_form_filling: false,
            allow_modify_other: false,
            allow_print: PrintPermission::None,
            encrypt_metadata: true,
        }));
    writer.write_to_memory().unwrap()
}

fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn number(doc: &Document, object: &Object) -> f32 {
    let object = match object {
        Object::Reference(id) => doc.get_object(*id).unwrap(),
        other => other,
    };
    match object {
        Object::Integer(i) => *i as f32,
        Object::Real(r) => *r,
        other => panic!("not a number: {:?}", other),
    }
}

/// `(width, height)` of every page, in page order
pub fn page_sizes(data: &[u8]) -> Vec<(f32, f32)> {
    let doc = Document::load_mem(data).unwrap();
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let media_box = inherited(&doc, page_id, b"MediaBox").expect("page has a MediaBox");
            let media_box = match media_box {
                Object::Reference(id) => doc.get_object(*id).unwrap(),
                other => other,
            };
            let values: Vec<f32> = media_box
                .as_array()
                .unwrap()
                .iter()
                .map(|v| number(&doc, v))
                .collect();
            (values[2] - values[0], values[3] - values[1])
        })
        .collect()
}

fn as_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match object {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn reaches_font(doc: &Document, resources: &Dictionary) -> bool {
    let has_font = resources
        .get(b"Font")
        .ok()
        .and_then(|fonts| as_dict(doc, fonts))
        .is_some_and(|fonts| fonts.iter().next().is_some());
    if has_font {
        return true;
    }

    let Some(xobjects) = resources.get(b"XObject").ok().and_then(|x| as_dict(doc, x)) else {
        return false;
    };
    xobjects.iter().any(|(_, xobject)| {
        let stream = match xobject {
            Object::Reference(id) => doc.get_object(*id).ok(),
            other => Some(other),
        }
        .and_then(|object| object.as_stream().ok());
        stream
            .and_then(|stream| stream.dict.get(b"Resources").ok())
            .and_then(|inner| as_dict(doc, inner))
            .is_some_and(|inner| reaches_font(doc, inner))
    })
}

/// Whether every page can reach its font, through its own resources or
/// through a form XObject it draws
pub fn every_page_reaches_font(data: &[u8]) -> bool {
    let doc = Document::load_mem(data).unwrap();
    doc.get_pages().values().all(|&page_id| {
        inherited(&doc, page_id, b"Resources")
            .and_then(|resources| as_dict(&doc, resources))
            .is_some_and(|resources| reaches_font(&doc, resources))
    })
}

/// Page count as qpdf sees it
pub fn page_count(data: &[u8]) -> u32 {
    QPdf::read_from_memory(data).unwrap().get_num_pages().unwrap()
}

pub fn is_encrypted(data: &[u8]) -> bool {
    QPdf::read_from_memory(data).unwrap().is_encrypted()
}

/// Page widths only, handy for checking page order
pub fn page_widths(data: &[u8]) -> Vec<f32> {
    page_sizes(data).into_iter().map(|(w, _)| w).collect()
}

/// A document information entry of an unencrypted PDF
pub fn info_entry(data: &[u8], key: &str) -> Option<String> {
    let doc = Document::load_mem(data).unwrap();
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    let value = info.get(key.as_bytes()).ok()?.as_str().ok()?;
    Some(String::from_utf8_lossy(value).into_owned())
}

/// A multipart part holding a PDF upload
pub fn pdf_part(name: &str, data: Vec<u8>) -> Part {
    Part::bytes(data)
        .file_name(name.to_string())
        .mime_str("application/pdf")
        .unwrap()
}

/// A server listening on an ephemeral loopback port with its own staging root
pub struct TestServer {
    pub base_url: String,
    pub client: reqwest::Client,
    pub staging_dir: PathBuf,
    _tmp: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(AppState::new).await
    }

    /// Start with a customized state, built from the test configuration
    pub async fn start_with<F>(build: F) -> Self
    where
        F: FnOnce(ServerConfig) -> AppState,
    {
        let tmp = TempDir::new().unwrap();
        let staging_dir = tmp.path().join("jobs");
        let config = ServerConfig {
            staging_dir: staging_dir.clone(),
            ..ServerConfig::default()
        };
        Self::launch(tmp, staging_dir, build(config)).await
    }

    /// Start with the default state but a smaller body limit
    pub async fn start_with_limit(max_upload_bytes: usize) -> Self {
        Self::start_with(|config| {
            AppState::new(ServerConfig {
                max_upload_bytes,
                ..config
            })
        })
        .await
    }

    async fn launch(tmp: TempDir, staging_dir: PathBuf, state: AppState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            serve(listener, state).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
            staging_dir,
            _tmp: tmp,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn job_dir(&self, id: &str) -> PathBuf {
        self.staging_dir.join(id)
    }

    /// Names of all job directories under the staging root
    pub fn job_dirs(&self) -> Vec<String> {
        match std::fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Sorted file names inside a job directory
    pub fn job_files(&self, id: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.job_dir(id))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub async fn post_form(&self, path: &str, form: Form) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    pub async fn upload(&self, files: Vec<(&str, Vec<u8>)>) -> reqwest::Response {
        let form = files
            .into_iter()
            .fold(Form::new(), |form, (name, data)| {
                form.part("files", pdf_part(name, data))
            });
        self.post_form("/api/merge", form).await
    }

    /// Upload and return the job id, asserting success
    pub async fn stage(&self, files: Vec<(&str, Vec<u8>)>) -> String {
        let response = self.upload(files).await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn merge(&self, id: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/api/merge?id={}", id)))
            .send()
            .await
            .unwrap()
    }
}

/// The `error` message of a JSON error response
pub async fn error_message(response: reqwest::Response) -> String {
    let body: serde_json::Value = response.json().await.unwrap();
    body["error"].as_str().unwrap().to_string()
}
