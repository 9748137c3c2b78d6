use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources. Anything else in the
// workspace (reference material, target output) is never linted.
const SOURCE_ROOTS: [&str; 7] = [
    "analysis",
    "model",
    "preprocess",
    "enrichment",
    "cli",
    "tests",
    "benches",
];

const FORBIDDEN_WORDS: &str = r"(//|/\*|///).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)";

#[derive(Clone, Copy)]
enum Lint {
    UnderscorePrefix,
    ForbiddenWord,
    StarsInComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Lint {
    fn pattern(self) -> &'static str {
        match self {
            Lint::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b",
            Lint::ForbiddenWord => FORBIDDEN_WORDS,
            Lint::StarsInComment => r"(//|/\*).*\*\*",
            Lint::UppercaseComment => r"(//|/\*|///).*",
            Lint::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        }
    }

    fn headline(self) -> &'static str {
        match self {
            Lint::UnderscorePrefix => "underscore-prefixed identifiers",
            Lint::ForbiddenWord => "comments describing edits instead of code",
            Lint::StarsInComment => "emphasis markers in non-doc comments",
            Lint::UppercaseComment => "comments written entirely in uppercase",
            Lint::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Lint::UnderscorePrefix => {
                "   Use the binding or remove it. Underscore prefixes are not allowed.\n"
            }
            Lint::ForbiddenWord => {
                "   Comments describe what the code does, not how it was edited.\n"
            }
            Lint::StarsInComment => "   Remove the ** markers or move the text into a doc comment.\n",
            Lint::UppercaseComment => "   Write the comment in ordinary sentence case.\n",
            Lint::AllowDeadCode => "   Either use the code or remove it completely.\n",
        }
    }

    // Decides whether a matched line is a real violation.
    fn accepts(self, line: &str) -> bool {
        match self {
            Lint::UnderscorePrefix => !is_comment(line) && !underscore_only_in_strings(line),
            Lint::ForbiddenWord | Lint::AllowDeadCode => true,
            Lint::StarsInComment => !is_doc_comment(line),
            Lint::UppercaseComment => comment_text(line).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }),
        }
    }
}

// Collects the offending lines of one file for one lint.
struct LintCollector {
    lint: Lint,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl LintCollector {
    fn new(lint: Lint, file_path: &Path) -> Self {
        Self {
            lint,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut message = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.lint.headline(),
            self.file_path.display()
        );
        for violation in &self.violations {
            message.push_str(&format!("   {violation}\n"));
        }
        message.push_str(self.lint.advice());
        Some(message)
    }
}

impl Sink for LintCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.lint.accepts(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///") || line.trim_start().starts_with("//!")
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

// True when every underscore-prefixed token sits inside a string literal.
fn underscore_only_in_strings(line: &str) -> bool {
    let code: String = line
        .split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(_, part)| part)
        .collect::<Vec<_>>()
        .join(" ");
    let code = code.split("//").next().unwrap_or("");
    !code
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|token| token.len() > 1 && token.starts_with('_'))
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed
        .strip_prefix("///")
        .or_else(|| trimmed.strip_prefix("//!"))
        .or_else(|| trimmed.strip_prefix("//"))
    {
        return Some(rest.trim());
    }
    let start = line.find("/*")?;
    let body = &line[start + 2..];
    Some(body.find("*/").map_or(body, |end| &body[..end]).trim())
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_ROOTS
        .iter()
        .filter(|root| Path::new(root).is_dir())
        .flat_map(|root| {
            WalkDir::new(root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.into_path())
        })
}

fn run_lint(lint: Lint, files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(lint.pattern())?;
    let mut searcher = Searcher::new();
    for path in files {
        let mut collector = LintCollector::new(lint, path);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(message) = collector.error_message() {
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    let files: Vec<PathBuf> = rust_sources().collect();
    let lints = [
        Lint::UnderscorePrefix,
        Lint::ForbiddenWord,
        Lint::StarsInComment,
        Lint::UppercaseComment,
        Lint::AllowDeadCode,
    ];
    for lint in lints {
        if let Err(e) = run_lint(lint, &files) {
            // eprintln keeps the report visible in cargo's output
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
