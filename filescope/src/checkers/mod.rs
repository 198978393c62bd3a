//! Shipped checkers and the static registration table.

pub mod av;
pub mod csv;
pub mod dpx;
pub mod dummy;
pub mod image;
pub mod json;
pub mod magic;
pub mod pdf;
pub mod pspp;
pub mod text;
pub mod warc;
pub mod xml;

use regex::Regex;

use crate::registry::{Registration, priority};

/// Compile a regex literal held in a `static`.
///
/// # Panics
///
/// Panics if `pattern` is not a valid regex. Patterns are literals, so this
/// only fires on a programming error.
#[must_use]
pub fn static_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => panic!("Invalid regex {pattern}: {err}"),
    }
}

/// The registration table, in declaration order.
///
/// Declaration order breaks ties between checkers of equal priority.
#[must_use]
pub fn registrations() -> Vec<Registration> {
    vec![
        Registration::specialized(|c| Box::new(pdf::VeraPdfChecker::new(c))),
        Registration::specialized(|c| Box::new(pdf::JhovePdfChecker::new(c))),
        Registration::specialized(|c| Box::new(pdf::GhostscriptChecker::new(c))),
        Registration::specialized(|c| Box::new(image::PngChecker::new(c))),
        Registration::specialized(|c| Box::new(image::ImageHeaderChecker::new(c))),
        Registration::specialized(|c| Box::new(dpx::DpxChecker::new(c))),
        Registration::specialized(|c| Box::new(av::FfprobeChecker::new(c))),
        Registration::specialized(|c| Box::new(av::MediainfoChecker::new(c))),
        Registration::specialized(|c| Box::new(warc::WarcChecker::new(c))),
        Registration::specialized(|c| Box::new(warc::ArcChecker::new(c))),
        Registration::specialized(|c| Box::new(text::TextfileChecker::new(c))),
        Registration::specialized(|c| Box::new(text::TextEncodingChecker::new(c))),
        Registration::specialized(|c| Box::new(magic::MagicTextChecker::new(c))),
        Registration::specialized(|c| Box::new(csv::CsvChecker::new(c))),
        Registration::specialized(|c| Box::new(json::JsonChecker::new(c))),
        Registration::specialized(|c| Box::new(json::JsonSchemaChecker::new(c))),
        Registration::specialized(|c| Box::new(xml::XmllintChecker::new(c))),
        Registration::specialized(|c| Box::new(xml::SchematronChecker::new(c))),
        Registration::specialized(|c| Box::new(pspp::PsppChecker::new(c))),
        Registration::cross_cutting(|c| Box::new(magic::MagicChecker::new(c)), priority::SIGNATURE),
    ]
}
