//! Word template filling.
//!
//! Tags use the Jinja syntax invoice templates are written in and are
//! rendered by tera:
//! - `{{ name }}`, `{{ var.field }}` and filters (`{{ total_ht | round(2) }}`,
//!   positional arguments of the usual Jinja filters are accepted);
//! - `{% if %}`, `{% for %}`, `{% set %}` within the text;
//! - `{%tr … %}`, `{%tc … %}`, `{%p … %}`, `{%r … %}`: the table row, cell,
//!   paragraph or run holding the tag is replaced by the plain `{% … %}`
//!   tag, so `{%tr for l in lignes %}` … `{%tr endfor %}` repeats the rows
//!   between the two marker rows.
//!
//! Word splits typed text into several runs whenever formatting or spell
//! checking changes, so tags are repaired before anything else by dropping
//! the XML markup that ended up inside `{{ … }}` and `{% … %}`. A tag never
//! extends past the end of its paragraph.

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tera::Tera;
use tracing::debug;
use zip::read::ZipArchive;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{FactureError, Result};

const PARAGRAPH_END: &str = "</w:p>";

/// Value bound to a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
    List(Vec<TemplateItem>),
}

/// One element of a list placeholder, e.g. a line item.
pub type TemplateItem = BTreeMap<String, TemplateValue>;

pub type Context = BTreeMap<String, TemplateValue>;

impl TemplateValue {
    fn to_json(&self) -> Value {
        match self {
            TemplateValue::Text(s) => Value::String(s.clone()),
            TemplateValue::Integer(i) => Value::from(*i),
            TemplateValue::Number(n) => Value::from(*n),
            TemplateValue::Bool(b) => Value::Bool(*b),
            TemplateValue::List(items) => Value::Array(items.iter().map(object_json).collect()),
        }
    }
}

fn object_json(values: &BTreeMap<String, TemplateValue>) -> Value {
    Value::Object(
        values
            .iter()
            .map(|(k, v)| (engine_name(k).into_owned(), v.to_json()))
            .collect::<Map<String, Value>>(),
    )
}

/// Name under which a placeholder is known to tera, whose identifiers are
/// ASCII only: `période_concernee` -> `__p_ue9_riode_concernee`.
fn engine_name(name: &str) -> Cow<'_, str> {
    if name.is_ascii() {
        return Cow::Borrowed(name);
    }
    let mut out = String::from("__");
    for c in name.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            out.push_str(&format!("_u{:x}_", c as u32));
        }
    }
    Cow::Owned(out)
}

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("template regex"))
}

fn split_open_var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"\{(?:<[^>]*>)+\{")
}

fn split_close_var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"\}(?:<[^>]*>)+\}")
}

fn split_open_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"\{(?:<[^>]*>)+%")
}

fn split_close_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"%(?:<[^>]*>)+\}")
}

fn tag_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"\{[{%]")
}

fn markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"<[^>]*>")
}

/// Body of every tag once repaired: group 1 for `{{ }}`, group 2 for `{% %}`.
fn tag_body_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?s)\{\{(.*?)\}\}|\{%(.*?)%\}")
}

fn structural_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"\{%(tr|tc|p|r)\s+(.*?)\s*%\}")
}

/// String literals are matched first so identifiers inside them are skipped.
fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(
        &RE,
        r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|\b[\p{L}_][\p{L}\p{N}_]*"#,
    )
}

fn bound_names_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(
        &RE,
        r"^\s*-?\s*(?:for|set|set_global)\s+([\p{L}_][\p{L}\p{N}_]*(?:\s*,\s*[\p{L}_][\p{L}\p{N}_]*)*)",
    )
}

fn jinja_filter_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"\|\s*(round|default|d|truncate|join|replace)\s*\(([^()]*)\)")
}

fn keyword_arg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"^\s*[A-Za-z_]\w*\s*=[^=]")
}

const KEYWORDS: &[&str] = &[
    "and", "as", "block", "break", "continue", "elif", "else", "endblock", "endfilter", "endfor",
    "endif", "endmacro", "endraw", "endset", "extends", "false", "False", "filter", "for", "if",
    "import", "in", "include", "is", "loop", "macro", "none", "None", "not", "or", "raw", "set",
    "set_global", "super", "true", "True",
];

/// Join `left`/`right` halves of a delimiter split across runs, unless the
/// split spans a paragraph end.
fn join_split(xml: &str, re: &Regex, joined: &str) -> String {
    re.replace_all(xml, |caps: &regex::Captures| {
        if caps[0].contains(PARAGRAPH_END) {
            caps[0].to_string()
        } else {
            joined.to_string()
        }
    })
    .into_owned()
}

/// Split a filter argument list on top-level commas.
fn split_args(args: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (i, c) in args.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, ',') => {
                out.push(&args[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if !args[start..].trim().is_empty() || !out.is_empty() {
        out.push(&args[start..]);
    }
    out
}

/// `round(2)` -> `round(precision=2)`: tera filters take keyword arguments.
fn keyword_filter_args(body: &str) -> String {
    jinja_filter_call_re()
        .replace_all(body, |caps: &regex::Captures| {
            let (filter, names): (&str, &[&str]) = match &caps[1] {
                "round" => ("round", &["precision", "method"][..]),
                "default" | "d" => ("default", &["value"][..]),
                "truncate" => ("truncate", &["length"][..]),
                "join" => ("join", &["sep"][..]),
                _ => ("replace", &["from", "to"][..]),
            };
            let args = split_args(&caps[2]);
            if args.is_empty() || args.len() > names.len() || args.iter().any(|a| keyword_arg_re().is_match(a)) {
                return caps[0].to_string();
            }
            let args: Vec<String> = names
                .iter()
                .zip(&args)
                .map(|(name, value)| format!("{}={}", name, value.trim()))
                .collect();
            format!("| {}({})", filter, args.join(", "))
        })
        .into_owned()
}

/// Clean the inside of one tag: markup dropped, entities and typographic
/// quotes turned back into what was typed, filter arguments named.
fn clean_tag_body(body: &str) -> String {
    let text = markup_re().replace_all(body, "");
    let text = match quick_xml::escape::unescape(&text) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => text.to_string(),
    };
    let text: String = text
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201c}' | '\u{201d}' => '"',
            '\u{a0}' => ' ',
            c => c,
        })
        .collect();
    keyword_filter_args(&text)
}

/// Rejoin tags split across runs and clean their content. An opening
/// delimiter whose closing one is not in the same paragraph is left alone.
fn preprocess(xml: &str) -> String {
    let xml = join_split(xml, split_open_var_re(), "{{");
    let xml = join_split(&xml, split_close_var_re(), "}}");
    let xml = join_split(&xml, split_open_tag_re(), "{%");
    let xml = join_split(&xml, split_close_tag_re(), "%}");

    let mut out = String::with_capacity(xml.len());
    let mut rest = xml.as_str();
    while let Some(open) = tag_open_re().find(rest) {
        let (opener, closer) = if open.as_str() == "{{" { ("{{", "}}") } else { ("{%", "%}") };
        let after = &rest[open.end()..];
        let close = after.find(closer);
        let boundary = after.find(PARAGRAPH_END);
        match close {
            Some(close) if boundary.map_or(true, |b| close < b) => {
                out.push_str(&rest[..open.start()]);
                out.push_str(opener);
                out.push_str(&clean_tag_body(&after[..close]));
                out.push_str(closer);
                rest = &after[close + closer.len()..];
            }
            _ => {
                debug!("unterminated '{}' left as text", opener);
                out.push_str(&rest[..open.end()]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte range of the innermost `tag` element around `pos`.
fn enclosing_element(xml: &str, pos: usize, tag: &str) -> std::result::Result<(usize, usize), String> {
    let before = &xml[..pos];
    let start = [format!("<{}>", tag), format!("<{} ", tag)]
        .iter()
        .filter_map(|open| before.rfind(open.as_str()))
        .max()
        .ok_or_else(|| format!("tag at byte {} is not inside a <{}> element", pos, tag))?;
    let close = format!("</{}>", tag);
    let end = xml[pos..]
        .find(close.as_str())
        .map(|i| pos + i + close.len())
        .ok_or_else(|| format!("unterminated <{}> element at byte {}", tag, pos))?;
    Ok((start, end))
}

fn element_tag(kind: &str) -> &'static str {
    match kind {
        "tr" => "w:tr",
        "tc" => "w:tc",
        "r" => "w:r",
        _ => "w:p",
    }
}

/// Replace each element holding a `{%tr|tc|p|r … %}` tag by the plain tag.
fn expand_structural_tags(xml: &str) -> std::result::Result<String, String> {
    let mut xml = xml.to_string();
    let mut from = 0;
    loop {
        let found = structural_tag_re().captures(&xml[from..]).and_then(|caps| {
            let m = caps.get(0)?;
            Some((from + m.start(), caps[1].to_string(), caps[2].to_string()))
        });
        let Some((pos, kind, statement)) = found else {
            return Ok(xml);
        };
        let (start, end) = enclosing_element(&xml, pos, element_tag(&kind))?;
        let tag = format!("{{% {} %}}", statement);
        xml.replace_range(start..end, &tag);
        from = start + tag.len();
    }
}

/// Identifiers of a tag body read from the context: attributes, filters,
/// tests, function names, keyword arguments and keywords excluded.
fn free_names(body: &str, out: &mut Vec<String>) {
    let mut after_is = false;
    for token in token_re().find_iter(body) {
        let name = token.as_str();
        if name.starts_with('"') || name.starts_with('\'') {
            after_is = false;
            continue;
        }
        if name == "is" {
            after_is = true;
            continue;
        }
        if after_is {
            if name != "not" {
                after_is = false;
            }
            continue;
        }
        if KEYWORDS.contains(&name) {
            continue;
        }
        let before = body[..token.start()].trim_end();
        if before.ends_with('.') || before.ends_with('|') {
            continue;
        }
        let next = body[token.end()..].trim_start();
        if next.starts_with('(') || (next.starts_with('=') && !next.starts_with("==")) {
            continue;
        }
        out.push(name.to_string());
    }
}

/// Top-level names a part reads. Loop and `set` variables are excluded.
fn collect_placeholders(xml: &str, out: &mut BTreeSet<String>) {
    let mut bound = BTreeSet::new();
    let mut used = Vec::new();
    for caps in tag_body_re().captures_iter(xml) {
        if let Some(statement) = caps.get(2) {
            if let Some(names) = bound_names_re().captures(statement.as_str()) {
                bound.extend(names[1].split(',').map(|n| n.trim().to_string()));
            }
            free_names(statement.as_str(), &mut used);
        } else if let Some(expr) = caps.get(1) {
            free_names(expr.as_str(), &mut used);
        }
    }
    out.extend(used.into_iter().filter(|n| !bound.contains(n)));
}

/// Tag bodies with non-ASCII identifiers renamed for tera.
fn engine_source(xml: &str) -> String {
    tag_body_re()
        .replace_all(xml, |caps: &regex::Captures| {
            token_re()
                .replace_all(&caps[0], |token: &regex::Captures| {
                    let t = &token[0];
                    if t.starts_with('"') || t.starts_with('\'') {
                        t.to_string()
                    } else {
                        engine_name(t).into_owned()
                    }
                })
                .into_owned()
        })
        .into_owned()
}

fn escape_xml(value: &str) -> String {
    quick_xml::escape::escape(value).into_owned()
}

fn new_engine() -> Tera {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![".xml"]);
    tera.set_escape_fn(escape_xml);
    tera
}

/// Error text with every underlying cause; tera keeps the useful part in
/// the source chain.
fn describe(err: &tera::Error) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    text
}

fn engine_context(context: &Context) -> std::result::Result<tera::Context, tera::Error> {
    tera::Context::from_value(object_json(context))
}

/// Parts that can carry placeholders.
fn is_templated_part(name: &str) -> bool {
    name == "word/document.xml"
        || ((name.starts_with("word/header") || name.starts_with("word/footer")) && name.ends_with(".xml"))
}

enum Part {
    Dir,
    Raw(Vec<u8>),
    /// Registered in the engine under the part name.
    Template,
}

/// A `.docx` template loaded in memory, tags repaired and compiled.
pub struct DocxTemplate {
    path: PathBuf,
    parts: Vec<(String, Part)>,
    engine: Tera,
    placeholders: BTreeSet<String>,
}

impl DocxTemplate {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FactureError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let template_err = |detail: String| FactureError::Template {
            path: path.to_path_buf(),
            detail,
        };
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file).map_err(|e| template_err(format!("Invalid zip: {}", e)))?;
        let mut parts = Vec::with_capacity(archive.len());
        let mut engine = new_engine();
        let mut placeholders = BTreeSet::new();
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| template_err(format!("Entry {}: {}", i, e)))?;
            let name = entry.name().replace('\\', "/");
            if entry.is_dir() {
                parts.push((name, Part::Dir));
                continue;
            }
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            if !is_templated_part(&name) {
                parts.push((name, Part::Raw(data)));
                continue;
            }
            let xml = String::from_utf8(data).map_err(|e| template_err(format!("{} is not UTF-8: {}", name, e)))?;
            let xml = expand_structural_tags(&preprocess(&xml)).map_err(|e| template_err(format!("{}: {}", name, e)))?;
            collect_placeholders(&xml, &mut placeholders);
            engine
                .add_raw_template(&name, &engine_source(&xml))
                .map_err(|e| template_err(describe(&e)))?;
            parts.push((name, Part::Template));
        }
        if !parts
            .iter()
            .any(|(name, part)| name == "word/document.xml" && matches!(part, Part::Template))
        {
            return Err(template_err("word/document.xml is missing".to_string()));
        }
        Ok(DocxTemplate {
            path: path.to_path_buf(),
            parts,
            engine,
            placeholders,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every top-level name the template reads.
    pub fn declared_placeholders(&self) -> BTreeSet<String> {
        self.placeholders.clone()
    }

    /// Render the whole package to bytes.
    pub fn render(&self, context: &Context) -> Result<Vec<u8>> {
        let template_err = |detail: String| FactureError::Template {
            path: self.path.clone(),
            detail,
        };
        let context = engine_context(context).map_err(|e| template_err(describe(&e)))?;
        let mut zip_writer = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, part) in &self.parts {
            match part {
                Part::Dir => {
                    zip_writer
                        .add_directory(name.as_str(), opts)
                        .map_err(|e| template_err(e.to_string()))?;
                }
                Part::Raw(data) => {
                    zip_writer
                        .start_file(name.as_str(), opts)
                        .map_err(|e| template_err(e.to_string()))?;
                    zip_writer.write_all(data)?;
                }
                Part::Template => {
                    let rendered = self
                        .engine
                        .render(name, &context)
                        .map_err(|e| template_err(format!("{}: {}", name, describe(&e))))?;
                    zip_writer
                        .start_file(name.as_str(), opts)
                        .map_err(|e| template_err(e.to_string()))?;
                    zip_writer.write_all(rendered.as_bytes())?;
                }
            }
        }
        let cursor = zip_writer.finish().map_err(|e| template_err(e.to_string()))?;
        Ok(cursor.into_inner())
    }

    /// Render and write to `out`, replacing any existing file.
    pub fn render_to(&self, context: &Context, out: &Path) -> Result<()> {
        let bytes = self.render(context)?;
        std::fs::write(out, bytes).map_err(|source| FactureError::OutputWriteFailed {
            path: out.to_path_buf(),
            source,
        })
    }
}

/// Visible text of `word/document.xml`: one line per paragraph, tabs
/// between table cells are not inserted.
pub fn document_text(path: &Path) -> Result<String> {
    let invalid = |detail: String| FactureError::Template {
        path: path.to_path_buf(),
        detail,
    };
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FactureError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            FactureError::Io(e)
        }
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| invalid(format!("Invalid zip: {}", e)))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| invalid(e.to_string()))?
        .read_to_string(&mut xml)?;

    let mut reader = Reader::from_str(&xml);
    let mut text = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event().map_err(|e| invalid(e.to_string()))? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" => text.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                text.push_str(&t.unescape().map_err(|e| invalid(e.to_string()))?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(text)
}
