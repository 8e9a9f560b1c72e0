//! Grayscale approximation
//!
//! None of the strategies here convert colors. They change how each page is
//! painted so that it reads as washed out or gray. A [`GrayscaleConverter`]
//! tries its strategies in order, each on a fresh copy of the document, and
//! returns the first output that succeeds.

use crate::error::{Error, Result};
use crate::pdf::QpdfWrapper;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

/// Maximum /Parent hops when looking up inherited page attributes
const MAX_TREE_DEPTH: usize = 32;

const PAGE_FORM: &str = "FmPage";
const PAGE_STATE: &str = "GSPage";
const VEIL_STATE: &str = "GSVeil";
const GRAY_STATE: &str = "GSGray";

/// One way of making a document look gray
pub trait GrayscaleStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Rewrite every page of `doc` in place
    fn apply(&self, doc: &mut Document) -> Result<()>;
}

/// Redraw each page as a form XObject over a white backdrop at reduced
/// opacity, then lay a faint gray veil over it.
#[derive(Debug, Clone)]
pub struct WashoutOverlay {
    pub page_opacity: f32,
    pub veil_gray: f32,
    pub veil_opacity: f32,
}

impl Default for WashoutOverlay {
    fn default() -> Self {
        Self {
            page_opacity: 0.8,
            veil_gray: 0.5,
            veil_opacity: 0.1,
        }
    }
}

/// Register a calibrated-gray graphics state and wrap the original content
/// in `q /GSGray gs ... Q`.
#[derive(Debug, Clone)]
pub struct GrayStateInjection {
    pub gamma: f32,
}

impl Default for GrayStateInjection {
    fn default() -> Self {
        Self { gamma: 2.2 }
    }
}

/// Output of a successful conversion
#[derive(Debug)]
pub struct GrayscaleOutput {
    pub data: Vec<u8>,
    /// Name of the strategy that produced `data`
    pub strategy: &'static str,
}

/// Ordered list of strategies with fallback
pub struct GrayscaleConverter {
    strategies: Vec<Box<dyn GrayscaleStrategy>>,
}

impl Default for GrayscaleConverter {
    fn default() -> Self {
        Self::new(vec![
            Box::new(WashoutOverlay::default()),
            Box::new(GrayStateInjection::default()),
        ])
    }
}

impl std::fmt::Debug for GrayscaleConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrayscaleConverter")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

impl GrayscaleConverter {
    pub fn new(strategies: Vec<Box<dyn GrayscaleStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Convert a PDF, falling back through the strategies in order
    ///
    /// The pages are first copied into a fresh unencrypted document. Page
    /// count and page boxes are left untouched.
    pub fn convert(&self, input: &[u8]) -> Result<GrayscaleOutput> {
        let rebuilt = QpdfWrapper::rebuild_unencrypted(input)?;
        let base = Document::load_mem(&rebuilt).map_err(|e| Error::InvalidPdf {
            reason: e.to_string(),
        })?;

        let mut failures = Vec::new();
        for strategy in &self.strategies {
            let mut doc = base.clone();
            match strategy.apply(&mut doc).and_then(|()| save(&mut doc)) {
                Ok(data) => {
                    if !failures.is_empty() {
                        tracing::info!(
                            strategy = strategy.name(),
                            "fallback grayscale strategy succeeded"
                        );
                    }
                    return Ok(GrayscaleOutput {
                        data,
                        strategy: strategy.name(),
                    });
                }
                Err(e) => {
                    tracing::warn!(strategy = strategy.name(), error = %e, "grayscale strategy failed");
                    failures.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        Err(Error::Conversion {
            reason: if failures.is_empty() {
                "no strategies configured".to_string()
            } else {
                failures.join("; ")
            },
        })
    }
}

impl GrayscaleStrategy for WashoutOverlay {
    fn name(&self) -> &'static str {
        "washout-overlay"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

        for page_id in page_ids {
            let [llx, lly, urx, ury] = media_box(doc, page_id)?;
            let (width, height) = (urx - llx, ury - lly);

            let original = doc.get_page_content(page_id)?;
            let resources = inherited_attribute(doc, page_id, b"Resources")
                .unwrap_or_else(|| Object::Dictionary(Dictionary::new()));

            let form_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![
                        Object::Real(llx),
                        Object::Real(lly),
                        Object::Real(urx),
                        Object::Real(ury),
                    ],
                    "Resources" => resources,
                },
                original,
            ));
            let page_state = doc.add_object(dictionary! {
                "Type" => "ExtGState",
                "ca" => self.page_opacity,
                "CA" => self.page_opacity,
            });
            let veil_state = doc.add_object(dictionary! {
                "Type" => "ExtGState",
                "ca" => self.veil_opacity,
                "CA" => self.veil_opacity,
            });

            let rect = || -> Vec<Object> {
                vec![llx.into(), lly.into(), width.into(), height.into()]
            };
            let content = Content {
                operations: vec![
                    // white backdrop
                    Operation::new("q", vec![]),
                    Operation::new("g", vec![Object::Real(1.0)]),
                    Operation::new("re", rect()),
                    Operation::new("f", vec![]),
                    Operation::new("Q", vec![]),
                    // original page, faded
                    Operation::new("q", vec![]),
                    Operation::new("gs", vec![name(PAGE_STATE)]),
                    Operation::new("Do", vec![name(PAGE_FORM)]),
                    Operation::new("Q", vec![]),
                    // gray veil
                    Operation::new("q", vec![]),
                    Operation::new("gs", vec![name(VEIL_STATE)]),
                    Operation::new("g", vec![self.veil_gray.into()]),
                    Operation::new("re", rect()),
                    Operation::new("f", vec![]),
                    Operation::new("Q", vec![]),
                ],
            }
            .encode()?;

            let resources = dictionary! {
                "XObject" => dictionary! { PAGE_FORM => form_id },
                "ExtGState" => dictionary! {
                    PAGE_STATE => page_state,
                    VEIL_STATE => veil_state,
                },
            };
            replace_page_content(doc, page_id, content, resources)?;
        }

        Ok(())
    }
}

impl GrayscaleStrategy for GrayStateInjection {
    fn name(&self) -> &'static str {
        "gray-state-injection"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

        for page_id in page_ids {
            let original = doc.get_page_content(page_id)?;

            let mut resources = match inherited_attribute(doc, page_id, b"Resources") {
                Some(object) => resolve_dictionary(doc, &object)?,
                None => Dictionary::new(),
            };
            let mut states = match resources.get(b"ExtGState") {
                Ok(object) => resolve_dictionary(doc, object)?,
                Err(_) => Dictionary::new(),
            };
            let mut spaces = match resources.get(b"ColorSpace") {
                Ok(object) => resolve_dictionary(doc, object)?,
                Err(_) => Dictionary::new(),
            };

            let cal_gray = Object::Array(vec![
                name("CalGray"),
                Object::Dictionary(dictionary! {
                    "WhitePoint" => vec![Object::Real(0.9505), Object::Real(1.0), Object::Real(1.089)],
                    "Gamma" => self.gamma,
                }),
            ]);
            let state_id = doc.add_object(dictionary! {
                "Type" => "ExtGState",
                "ca" => Object::Real(1.0),
                "CA" => Object::Real(1.0),
                "BM" => "Normal",
                "DefaultGray" => cal_gray.clone(),
            });

            let state_name = unused_name(&states, GRAY_STATE);
            states.set(state_name.clone(), state_id);
            if !spaces.has(b"DefaultGray") {
                spaces.set("DefaultGray", cal_gray);
            }
            resources.set("ExtGState", states);
            resources.set("ColorSpace", spaces);

            let mut content = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new("gs", vec![name(&state_name)]),
                ],
            }
            .encode()?;
            content.push(b'\n');
            content.extend_from_slice(&original);
            content.extend_from_slice(b"\nQ\n");

            replace_page_content(doc, page_id, content, resources)?;
        }

        Ok(())
    }
}

fn name(value: &str) -> Object {
    Object::Name(value.as_bytes().to_vec())
}

fn save(doc: &mut Document) -> Result<Vec<u8>> {
    doc.compress();
    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Look up a page attribute, following /Parent for inheritable keys.
fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value.clone());
        }
        let parent = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve_dictionary(doc: &Document, object: &Object) -> Result<Dictionary> {
    match object {
        Object::Dictionary(dict) => Ok(dict.clone()),
        Object::Reference(id) => Ok(doc.get_dictionary(*id)?.clone()),
        other => Err(Error::Lopdf {
            reason: format!("expected a dictionary, found {}", other.enum_variant()),
        }),
    }
}

fn media_box(doc: &Document, page_id: ObjectId) -> Result<[f32; 4]> {
    let object = inherited_attribute(doc, page_id, b"MediaBox").ok_or_else(|| Error::Lopdf {
        reason: format!("page {:?} has no MediaBox", page_id),
    })?;
    let values = match &object {
        Object::Reference(id) => doc.get_object(*id)?.as_array()?.clone(),
        other => other.as_array()?.clone(),
    };
    if values.len() != 4 {
        return Err(Error::Lopdf {
            reason: format!("page {:?} has a malformed MediaBox", page_id),
        });
    }

    let mut rect = [0.0; 4];
    for (slot, value) in rect.iter_mut().zip(&values) {
        *slot = value.as_float()?;
    }
    Ok(rect)
}

fn unused_name(dict: &Dictionary, base: &str) -> String {
    if !dict.has(base.as_bytes()) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !dict.has(candidate.as_bytes()))
        .unwrap_or_else(|| base.to_string())
}

fn replace_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    content: Vec<u8>,
    resources: Dictionary,
) -> Result<()> {
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
    let page = doc.get_dictionary_mut(page_id)?;
    page.set("Contents", content_id);
    page.set("Resources", resources);
    Ok(())
}
