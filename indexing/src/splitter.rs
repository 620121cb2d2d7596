//! Text splitting strategies.
//!
//! Every splitter is a recursive separator splitter: the text is cut on the
//! first separator it contains, pieces that are still too large are cut on
//! the next separator, and adjacent small pieces are merged back together up
//! to `chunk_size` units with a trailing window of `chunk_overlap` units
//! repeated at the start of the following fragment. Variants differ in how
//! units are measured and which separators are tried:
//!
//! - `RecursiveCharacterTextSplitter`: characters, paragraph/line/word separators
//! - `TokenTextSplitter`: tokens of the configured tokenizer, same separators
//! - `CodeSplitter_<lang>`: characters, language-aware separators that stay
//!   attached to the start of the following piece

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use omni_common::TokenCounter;

use crate::error::{IndexingError, Result};

/// Name of the default splitter model.
pub const RECURSIVE_CHARACTER_SPLITTER: &str = "RecursiveCharacterTextSplitter";

/// Name of the token-count splitter model.
pub const TOKEN_SPLITTER: &str = "TokenTextSplitter";

/// Prefix of language-aware splitter model names.
pub const CODE_SPLITTER_PREFIX: &str = "CodeSplitter_";

const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Capability shared by all splitters.
pub trait TextSplitter: Send + Sync {
    /// Model name this splitter was built from.
    fn model_name(&self) -> &str;

    /// Split `text` into ordered, non-empty fragments.
    fn split_text(&self, text: &str) -> Vec<String>;
}

/// Languages with dedicated code splitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Cpp,
    Go,
    Java,
    Js,
    Php,
    Proto,
    Python,
    Rst,
    Ruby,
    Rust,
    Scala,
    Swift,
    Markdown,
    Latex,
    Html,
    Sol,
}

impl Language {
    /// All supported languages.
    pub const ALL: [Language; 16] = [
        Language::Cpp,
        Language::Go,
        Language::Java,
        Language::Js,
        Language::Php,
        Language::Proto,
        Language::Python,
        Language::Rst,
        Language::Ruby,
        Language::Rust,
        Language::Scala,
        Language::Swift,
        Language::Markdown,
        Language::Latex,
        Language::Html,
        Language::Sol,
    ];

    /// Lowercase language tag used in splitter model names.
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Java => "java",
            Language::Js => "js",
            Language::Php => "php",
            Language::Proto => "proto",
            Language::Python => "python",
            Language::Rst => "rst",
            Language::Ruby => "ruby",
            Language::Rust => "rust",
            Language::Scala => "scala",
            Language::Swift => "swift",
            Language::Markdown => "markdown",
            Language::Latex => "latex",
            Language::Html => "html",
            Language::Sol => "sol",
        }
    }

    /// Look up a language by tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == tag)
    }

    /// Separators tried in order, most structural first.
    pub fn separators(self) -> &'static [&'static str] {
        match self {
            Language::Cpp => &[
                "\nclass ", "\nvoid ", "\nint ", "\nfloat ", "\ndouble ", "\nif ", "\nfor ",
                "\nwhile ", "\nswitch ", "\ncase ", "\n\n", "\n", " ", "",
            ],
            Language::Go => &[
                "\nfunc ", "\nvar ", "\nconst ", "\ntype ", "\nif ", "\nfor ", "\nswitch ",
                "\ncase ", "\n\n", "\n", " ", "",
            ],
            Language::Java => &[
                "\nclass ", "\npublic ", "\nprotected ", "\nprivate ", "\nstatic ", "\nif ",
                "\nfor ", "\nwhile ", "\nswitch ", "\ncase ", "\n\n", "\n", " ", "",
            ],
            Language::Js => &[
                "\nfunction ", "\nconst ", "\nlet ", "\nvar ", "\nclass ", "\nif ", "\nfor ",
                "\nwhile ", "\nswitch ", "\ncase ", "\ndefault ", "\n\n", "\n", " ", "",
            ],
            Language::Php => &[
                "\nfunction ", "\nclass ", "\nif ", "\nforeach ", "\nwhile ", "\ndo ",
                "\nswitch ", "\ncase ", "\n\n", "\n", " ", "",
            ],
            Language::Proto => &[
                "\nmessage ", "\nservice ", "\nenum ", "\noption ", "\nimport ", "\nsyntax ",
                "\n\n", "\n", " ", "",
            ],
            Language::Python => &["\nclass ", "\ndef ", "\n\tdef ", "\n\n", "\n", " ", ""],
            Language::Rst => &["\n===", "\n---", "\n***", "\n\n.. ", "\n\n", "\n", " ", ""],
            Language::Ruby => &[
                "\ndef ", "\nclass ", "\nif ", "\nunless ", "\nwhile ", "\nfor ", "\ndo ",
                "\nbegin ", "\nrescue ", "\n\n", "\n", " ", "",
            ],
            Language::Rust => &[
                "\nfn ", "\nconst ", "\nlet ", "\nif ", "\nwhile ", "\nfor ", "\nloop ",
                "\nmatch ", "\n\n", "\n", " ", "",
            ],
            Language::Scala => &[
                "\nclass ", "\nobject ", "\ndef ", "\nval ", "\nvar ", "\nif ", "\nfor ",
                "\nwhile ", "\nmatch ", "\ncase ", "\n\n", "\n", " ", "",
            ],
            Language::Swift => &[
                "\nfunc ", "\nclass ", "\nstruct ", "\nenum ", "\nif ", "\nfor ", "\nwhile ",
                "\ndo ", "\nswitch ", "\ncase ", "\n\n", "\n", " ", "",
            ],
            Language::Markdown => &[
                "\n# ", "\n## ", "\n### ", "\n#### ", "\n##### ", "\n###### ", "```\n",
                "\n***\n", "\n---\n", "\n___\n", "\n\n", "\n", " ", "",
            ],
            Language::Latex => &[
                "\n\\chapter{", "\n\\section{", "\n\\subsection{", "\n\\subsubsection{",
                "\n\\begin{enumerate}", "\n\\begin{itemize}", "\n\\begin{description}",
                "\n\\begin{list}", "\n\\begin{quote}", "\n\\begin{quotation}",
                "\n\\begin{verse}", "\n\\begin{verbatim}", "\n\\begin{align}", "$$", "$", " ", "",
            ],
            Language::Html => &[
                "<body", "<div", "<p", "<br", "<li", "<h1", "<h2", "<h3", "<h4", "<h5", "<h6",
                "<span", "<table", "<tr", "<td", "<th", "<ul", "<ol", "<header", "<footer",
                "<nav", "<head", "<style", "<script", "<meta", "<title", "",
            ],
            Language::Sol => &[
                "\npragma ", "\nusing ", "\ncontract ", "\ninterface ", "\nlibrary ",
                "\nconstructor ", "\ntype ", "\nfunction ", "\nevent ", "\nmodifier ",
                "\nerror ", "\nstruct ", "\nenum ", "\nif ", "\nfor ", "\nwhile ",
                "\ndo while ", "\nassembly ", "\n\n", "\n", " ", "",
            ],
        }
    }
}

/// Which splitter a model name selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitterKind {
    /// Character-count recursive splitter.
    RecursiveCharacter,
    /// Token-count recursive splitter.
    Token,
    /// Language-aware code splitter.
    Code(Language),
}

impl SplitterKind {
    /// Parse a splitter model name.
    pub fn from_model_name(name: &str) -> Result<Self> {
        if name == RECURSIVE_CHARACTER_SPLITTER {
            return Ok(Self::RecursiveCharacter);
        }
        if name == TOKEN_SPLITTER {
            return Ok(Self::Token);
        }
        if let Some(tag) = name.strip_prefix(CODE_SPLITTER_PREFIX) {
            return Language::from_tag(tag)
                .map(Self::Code)
                .ok_or_else(|| IndexingError::Config(format!("unsupported splitter language: {tag}")));
        }
        Err(IndexingError::Config(format!("unknown splitter model: {name}")))
    }

    /// Canonical model name.
    pub fn model_name(self) -> String {
        match self {
            Self::RecursiveCharacter => RECURSIVE_CHARACTER_SPLITTER.to_string(),
            Self::Token => TOKEN_SPLITTER.to_string(),
            Self::Code(language) => format!("{CODE_SPLITTER_PREFIX}{}", language.as_str()),
        }
    }
}

/// How fragment sizes are measured.
#[derive(Clone)]
enum Measure {
    Chars,
    Tokens(Arc<dyn TokenCounter>),
}

impl Measure {
    fn len(&self, text: &str) -> usize {
        match self {
            Measure::Chars => text.chars().count(),
            Measure::Tokens(counter) => counter.count(text),
        }
    }
}

impl fmt::Debug for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measure::Chars => f.write_str("Chars"),
            Measure::Tokens(counter) => write!(f, "Tokens({})", counter.name()),
        }
    }
}

/// Recursive separator splitter backing every splitter model.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    model_name: String,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<&'static str>,
    keep_separator: bool,
    measure: Measure,
}

impl RecursiveSplitter {
    fn build(
        kind: SplitterKind,
        chunk_size: usize,
        chunk_overlap: usize,
        measure: Measure,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(IndexingError::Config("chunk_size must be positive".to_string()));
        }
        if chunk_overlap > chunk_size {
            return Err(IndexingError::Config(format!(
                "chunk_overlap ({chunk_overlap}) exceeds chunk_size ({chunk_size})"
            )));
        }

        let (separators, keep_separator) = match kind {
            SplitterKind::Code(language) => (language.separators().to_vec(), true),
            _ => (DEFAULT_SEPARATORS.to_vec(), false),
        };

        Ok(Self {
            model_name: kind.model_name(),
            chunk_size,
            chunk_overlap,
            separators,
            keep_separator,
            measure,
        })
    }

    /// Character-count splitter.
    pub fn recursive_character(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::build(SplitterKind::RecursiveCharacter, chunk_size, chunk_overlap, Measure::Chars)
    }

    /// Token-count splitter using `counter`.
    pub fn token(
        chunk_size: usize,
        chunk_overlap: usize,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<Self> {
        Self::build(SplitterKind::Token, chunk_size, chunk_overlap, Measure::Tokens(counter))
    }

    /// Language-aware character-count splitter.
    pub fn code(language: Language, chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::build(SplitterKind::Code(language), chunk_size, chunk_overlap, Measure::Chars)
    }

    fn split_recursive(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        // Pick the first separator present; the empty separator always matches.
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&'static str] = &[];
        for (i, candidate) in separators.iter().copied().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let pieces = split_on(text, separator, self.keep_separator);
        let joiner = if self.keep_separator { "" } else { separator };

        let mut fragments = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in pieces {
            if self.measure.len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                fragments.extend(self.merge(&pending, joiner));
                pending.clear();
            }
            if remaining.is_empty() {
                fragments.push(piece.to_string());
            } else {
                fragments.extend(self.split_recursive(piece, remaining));
            }
        }
        if !pending.is_empty() {
            fragments.extend(self.merge(&pending, joiner));
        }
        fragments
    }

    /// Merge small pieces into fragments of at most `chunk_size` units,
    /// carrying up to `chunk_overlap` units into the next fragment.
    fn merge(&self, pieces: &[&str], joiner: &str) -> Vec<String> {
        let joiner_len = self.measure.len(joiner);
        let mut fragments = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = self.measure.len(piece);

            if total + len + joiner_cost(&window, joiner_len) > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "Created a fragment of size {total}, which is longer than the specified {}",
                        self.chunk_size
                    );
                }
                if !window.is_empty() {
                    if let Some(fragment) = join_window(&window, joiner) {
                        fragments.push(fragment);
                    }
                    while total > self.chunk_overlap
                        || (total > 0
                            && total + len + joiner_cost(&window, joiner_len)
                                > self.chunk_size)
                    {
                        let Some(first) = window.pop_front() else {
                            break;
                        };
                        let dropped =
                            self.measure.len(first) + joiner_cost(&window, joiner_len);
                        total = total.saturating_sub(dropped);
                    }
                }
            }

            total += len + joiner_cost(&window, joiner_len);
            window.push_back(piece);
        }

        if let Some(fragment) = join_window(&window, joiner) {
            fragments.push(fragment);
        }
        fragments
    }
}

impl TextSplitter for RecursiveSplitter {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
            .into_iter()
            .filter(|f| !f.trim().is_empty())
            .collect()
    }
}

/// Build the splitter named by `model_name`.
///
/// `counter` is only used by the token splitter.
pub fn build_splitter(
    model_name: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    counter: Arc<dyn TokenCounter>,
) -> Result<Box<dyn TextSplitter>> {
    let splitter = match SplitterKind::from_model_name(model_name)? {
        SplitterKind::RecursiveCharacter => {
            RecursiveSplitter::recursive_character(chunk_size, chunk_overlap)?
        }
        SplitterKind::Token => RecursiveSplitter::token(chunk_size, chunk_overlap, counter)?,
        SplitterKind::Code(language) => RecursiveSplitter::code(language, chunk_size, chunk_overlap)?,
    };
    Ok(Box::new(splitter))
}

/// Split on `separator`, dropping empty pieces. With `keep_separator` each
/// separator stays at the start of the piece that follows it.
fn split_on<'a>(text: &'a str, separator: &str, keep_separator: bool) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    if !keep_separator {
        return text.split(separator).filter(|p| !p.is_empty()).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        if index > start {
            pieces.push(&text[start..index]);
        }
        start = index;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn joiner_cost(window: &VecDeque<&str>, joiner_len: usize) -> usize {
    if window.is_empty() { 0 } else { joiner_len }
}

fn join_window(window: &VecDeque<&str>, joiner: &str) -> Option<String> {
    let joined = window.iter().copied().collect::<Vec<_>>().join(joiner);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
