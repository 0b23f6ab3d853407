//! Deterministic code block processing: language detection and whitespace
//! normalization.
//!
//! Detection walks an ordered table of language signatures and stops at the
//! first rule that reaches the confidence threshold. Normalization only ever
//! touches whitespace, so the token sequence of the code is unchanged.

use std::sync::LazyLock;

use regex::Regex;

use sitescribe_shared::CodeBlock;

/// Label used when no rule matches confidently.
pub const FALLBACK_LANGUAGE: &str = "text";

/// Score a rule needs before its language is reported.
const CONFIDENT: u32 = 3;
const STRONG_WEIGHT: u32 = 3;
const WEAK_WEIGHT: u32 = 1;

// ---------------------------------------------------------------------------
// Signature table
// ---------------------------------------------------------------------------

struct Signature {
    language: &'static str,
    /// One match is enough on its own.
    strong: &'static [&'static str],
    /// Each distinct match adds a point.
    weak: &'static [&'static str],
}

/// Evaluated top to bottom. Earlier rules shadow later ones, so the more
/// distinctive languages come first.
const SIGNATURES: &[Signature] = &[
    Signature {
        language: "xml",
        strong: &[r"^\s*<\?xml\b"],
        weak: &[],
    },
    Signature {
        language: "html",
        strong: &[
            r"(?i)^\s*<!doctype\s+html",
            r"(?i)^\s*<(html|head|body|div|section|main|article|nav|header|footer|ul|ol|table|form|p|span|a|button|template)\b[^>]*>",
        ],
        weak: &[r"(?i)</(div|span|p|a|li|td)>", r#"\bclass="[^"]*""#],
    },
    Signature {
        language: "rust",
        strong: &[
            r"\bfn\s+\w+\s*(<[^>]*>)?\s*\(",
            r"\blet\s+mut\s+\w+",
            r"\bimpl\b(\s*<[^>]*>)?\s+[\w:]+",
            r"(?m)^\s*use\s+\w+(::[\w{}*, ]+)+;",
            r"\b(println|format|vec|macro_rules)!\s*[\(\[{]",
            r"(?m)^\s*#\[(derive|cfg|test|tokio::main)",
        ],
        weak: &[
            r"::",
            r"&mut\b",
            r"\bmatch\b",
            r"\b(Some|Ok|Err)\(",
            r"\bNone\b",
            r"\bpub\s+(struct|enum|trait)\b",
        ],
    },
    Signature {
        language: "go",
        strong: &[
            r"(?m)^\s*package\s+\w+\s*$",
            r"\bfunc\s+(\(\w+\s+\*?\w+\)\s*)?\w+\s*\(",
            r"\berr\s*!=\s*nil\b",
            r"\bfmt\.\w+\(",
        ],
        weak: &[r":=", r"\bgo\s+func\b", r"\bchan\b", r"\bdefer\b"],
    },
    Signature {
        language: "java",
        strong: &[
            r"\bpublic\s+(static\s+)?(final\s+)?(class|interface|enum|void)\b",
            r"\bSystem\.(out|err)\.print",
            r"(?m)^\s*import\s+java\.",
        ],
        weak: &[r"\bprivate\s+\w+\s+\w+;", r"@Override\b", r"\bnew\s+\w+<"],
    },
    Signature {
        language: "cpp",
        strong: &[
            r"(?m)^\s*#include\s*[<\x22]",
            r"\bstd::\w+",
            r"\bcout\s*<<",
            r"\btemplate\s*<",
        ],
        weak: &[r"\bint\s+main\s*\(", r"\bnullptr\b", r"\bprintf\s*\(", r"->"],
    },
    Signature {
        language: "typescript",
        strong: &[
            r"\binterface\s+\w+(\s+extends\s+[\w, ]+)?\s*\{",
            r"\b(const|let|var)\s+\w+\s*:\s*[\w\[\]<>|]+\s*=",
            r"\)\s*:\s*(string|number|boolean|void|any|unknown|never|Promise<)",
            r"(?m)^\s*(export\s+)?type\s+\w+(<[^>]*>)?\s*=",
            r"\bas\s+const\b",
        ],
        weak: &[r":\s*(string|number|boolean)\b", r"\breadonly\b", r"\benum\s+\w+"],
    },
    Signature {
        language: "javascript",
        strong: &[
            r"\b(const|let|var)\s+\w+\s*=",
            r"\bfunction\s*\w*\s*\(",
            r"\bconsole\.\w+\(",
            r"\brequire\(\s*['\x22]",
            r"(?m)^\s*export\s+(default|const|function|class)\b",
            r"(?m)^\s*import\s+.+\s+from\s+['\x22]",
            r"\bdocument\.\w+",
        ],
        weak: &[r"=>", r"===", r"\basync\s", r"\bawait\s"],
    },
    Signature {
        language: "python",
        strong: &[
            r"(?m)^\s*def\s+\w+\s*\(.*\)\s*(->\s*[^:]+)?:\s*$",
            r"(?m)^\s*class\s+\w+(\(.*\))?:\s*$",
            r"(?m)^\s*(from\s+[\w.]+\s+)?import\s+[\w.]+(\s+as\s+\w+)?(,\s*[\w.]+)*\s*$",
            r"(?m)^\s*(elif\s.*|except(\s.*)?|try|finally):\s*$",
            r"\bif\s+__name__\s*==",
        ],
        weak: &[
            r"\bself\.",
            r"\b(True|False|None)\b",
            r"\bprint\(",
            r"(?m)^\s*@\w+",
            r#"\bf["']"#,
        ],
    },
    Signature {
        language: "sql",
        strong: &[
            r"(?is)^\s*select\b.+?\bfrom\b",
            r"(?i)^\s*insert\s+into\b",
            r"(?i)^\s*update\s+\w+\s+set\b",
            r"(?i)^\s*delete\s+from\b",
            r"(?i)^\s*(create|alter|drop)\s+(table|index|view|database|schema)\b",
        ],
        weak: &[r"(?i)\bwhere\b", r"(?i)\bjoin\b", r"(?i)\bgroup\s+by\b", r"(?i)\border\s+by\b"],
    },
    Signature {
        language: "css",
        strong: &[
            r"(?m)^\s*[.#][\w-]+[^{};()]*\{\s*$",
            r"(?m)^\s*[a-z][\w-]*\s*\{\s*\n\s*[\w-]+\s*:\s*[^;]+;",
            r"@media\s",
        ],
        weak: &[r"(?m)^\s*[\w-]+\s*:\s*[^;{}]+;\s*$", r"!important"],
    },
    Signature {
        language: "yaml",
        strong: &[
            r"(?m)^[\w.-]+:\s*\n\s+[\w.-]+:",
            r"(?m)^\s*-\s+[\w.-]+:\s",
        ],
        weak: &[r"(?m)^[\w.-]+:\s+\S", r"(?m)^---\s*$", r"(?m)^\s*#\s"],
    },
    Signature {
        language: "bash",
        strong: &[
            r"^#!\s*/(usr/)?bin/(env\s+)?(ba|z)?sh",
            r"(?m)^\s*\$\s+\w+",
            r"(?m)^\s*(sudo|apt|apt-get|brew|npm|npx|yarn|pnpm|pip|pip3|cargo|git|curl|wget|docker|kubectl|cd|mkdir|export|chmod|echo|bun|make|rm|cp|mv|tar)\s",
        ],
        weak: &[r"\$\{?\w+\}?", r"&&", r"\|\s*\w+", r"(?m)^\s*(fi|done|esac)\s*$"],
    },
];

struct CompiledSignature {
    language: &'static str,
    strong: Vec<Regex>,
    weak: Vec<Regex>,
}

static COMPILED: LazyLock<Vec<CompiledSignature>> = LazyLock::new(|| {
    SIGNATURES
        .iter()
        .map(|sig| CompiledSignature {
            language: sig.language,
            strong: sig.strong.iter().map(|p| Regex::new(p).unwrap()).collect(),
            weak: sig.weak.iter().map(|p| Regex::new(p).unwrap()).collect(),
        })
        .collect()
});

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Detect the language of a code span, or `None` when nothing is confident.
pub fn detect_language(code: &str) -> Option<&'static str> {
    let code = code.trim();
    if code.is_empty() {
        return None;
    }
    if looks_like_json(code) {
        return Some("json");
    }

    COMPILED.iter().find_map(|sig| {
        let strong = sig.strong.iter().filter(|re| re.is_match(code)).count() as u32;
        let weak = sig.weak.iter().filter(|re| re.is_match(code)).count() as u32;
        (strong * STRONG_WEIGHT + weak * WEAK_WEIGHT >= CONFIDENT).then_some(sig.language)
    })
}

/// An object or array that parses as JSON.
fn looks_like_json(code: &str) -> bool {
    (code.starts_with('{') || code.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(code).is_ok()
}

/// Map a fence info string or class name to a canonical language label.
///
/// Strips `language-`/`lang-`/`highlight-` prefixes, lowercases, and folds
/// common aliases (`py` → `python`, `sh` → `bash`, ...). Unknown labels pass
/// through lowercased; empty labels become `None`.
pub fn canonical_language(label: &str) -> Option<String> {
    let label = label.trim().to_ascii_lowercase();
    let label = ["language-", "lang-", "highlight-", "source-"]
        .iter()
        .find_map(|prefix| label.strip_prefix(prefix))
        .unwrap_or(&label)
        .trim_start_matches('{')
        .trim_start_matches('.')
        .trim_end_matches('}')
        .to_string();

    let canonical = match label.as_str() {
        "" => return None,
        "py" | "py3" | "python3" => "python",
        "js" | "jsx" | "node" | "mjs" | "cjs" | "javascript" => "javascript",
        "ts" | "tsx" | "typescript" => "typescript",
        "sh" | "shell" | "zsh" | "console" | "shell-session" | "shellsession" | "bash" => "bash",
        "yml" | "yaml" => "yaml",
        "rs" | "rust" => "rust",
        "golang" | "go" => "go",
        "c++" | "cc" | "cxx" | "hpp" | "cpp" => "cpp",
        "htm" | "xhtml" | "html" => "html",
        "postgres" | "postgresql" | "mysql" | "sqlite" | "plsql" | "sql" => "sql",
        "plaintext" | "plain" | "txt" | "none" | "text" => FALLBACK_LANGUAGE,
        other => return Some(other.to_string()),
    };
    Some(canonical.to_string())
}

/// Pick the final label for a block. The detector wins whenever it is
/// confident; otherwise a labelled fence keeps its (canonical) label.
pub fn reconcile_language(declared: Option<&str>, detected: Option<&str>) -> String {
    if let Some(detected) = detected {
        return detected.to_string();
    }
    declared
        .and_then(canonical_language)
        .unwrap_or_else(|| FALLBACK_LANGUAGE.to_string())
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize whitespace in a code span.
///
/// - CRLF and lone CR become LF
/// - non-breaking spaces in leading indentation become spaces
/// - trailing whitespace is removed from every line
/// - leading and trailing blank lines are dropped
/// - the indentation prefix shared by all non-blank lines is removed
///
/// Interior blank lines, relative indentation and every non-whitespace
/// character are kept. Normalizing twice gives the same result as once.
pub fn normalize_code(code: &str) -> String {
    let unified = code.replace("\r\n", "\n").replace('\r', "\n");

    let lines: Vec<String> = unified
        .split('\n')
        .map(|line| {
            let indent_len = line.len() - line.trim_start_matches([' ', '\t', '\u{a0}']).len();
            let (indent, rest) = line.split_at(indent_len);
            format!("{}{}", indent.replace('\u{a0}', " "), rest).trim_end().to_string()
        })
        .collect();

    let Some(first) = lines.iter().position(|l| !l.is_empty()) else {
        return String::new();
    };
    let last = lines.iter().rposition(|l| !l.is_empty()).unwrap_or(first);
    let lines = &lines[first..=last];

    let prefix = common_indent(lines);
    lines
        .iter()
        .map(|line| line.strip_prefix(prefix.as_str()).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Longest space/tab prefix shared by every non-blank line.
///
/// Other Unicode whitespace is content, not indentation, matching the leading
/// run that `normalize_code` rewrites.
fn common_indent(lines: &[String]) -> String {
    let mut prefix: Option<&str> = None;
    for line in lines.iter().filter(|l| !l.is_empty()) {
        let indent = &line[..line.len() - line.trim_start_matches([' ', '\t']).len()];
        prefix = Some(match prefix {
            None => indent,
            Some(current) => {
                let shared = current
                    .char_indices()
                    .zip(indent.chars())
                    .take_while(|((_, a), b)| a == b)
                    .last()
                    .map(|((i, c), _)| i + c.len_utf8())
                    .unwrap_or(0);
                &current[..shared]
            }
        });
        if prefix == Some("") {
            break;
        }
    }
    prefix.unwrap_or("").to_string()
}

/// Normalize a span and detect its language.
pub fn process_code(raw: &str) -> CodeBlock {
    let normalized_text = normalize_code(raw);
    CodeBlock {
        raw_text: raw.to_string(),
        detected_language: detect_language(&normalized_text).map(str::to_string),
        normalized_text,
    }
}
