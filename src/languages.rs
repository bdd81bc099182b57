//! Detección de lenguaje por extensión y registro de gramáticas tree-sitter.

use std::fmt;
use std::path::Path;

/// Lenguajes con gramática registrada. Añadir un lenguaje es añadir una
/// variante aquí y su rama en `extractor::classify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Java,
    Rust,
}

/// Extensiones que la ingesta considera código fuente.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["py", "js", "jsx", "ts", "tsx", "go", "java", "rs"];

impl Lang {
    /// Identificador guardado como `language` en el nodo `:File`.
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Java => "java",
            Self::Rust => "rust",
        }
    }

    pub fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Detecta el lenguaje a partir de la extensión del fichero.
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "py" => Some(Lang::Python),
        "js" | "jsx" => Some(Lang::JavaScript),
        "ts" => Some(Lang::TypeScript),
        "tsx" => Some(Lang::Tsx),
        "go" => Some(Lang::Go),
        "java" => Some(Lang::Java),
        "rs" => Some(Lang::Rust),
        _ => None,
    }
}

/// ¿Tiene el fichero una extensión soportada?
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_every_supported_extension() {
        for ext in SUPPORTED_EXTENSIONS {
            let path = format!("src/file.{ext}");
            assert!(
                detect_language(Path::new(&path)).is_some(),
                "sin lenguaje para .{ext}"
            );
            assert!(is_supported(Path::new(&path)));
        }
    }

    #[test]
    fn jsx_maps_to_javascript_and_tsx_to_its_own_grammar() {
        assert_eq!(detect_language(Path::new("a.jsx")), Some(Lang::JavaScript));
        assert_eq!(detect_language(Path::new("a.tsx")), Some(Lang::Tsx));
        assert_eq!(detect_language(Path::new("A.RS")), Some(Lang::Rust));
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        assert_eq!(detect_language(Path::new("README.md")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
        assert!(!is_supported(Path::new("styles.css")));
    }

    #[test]
    fn every_grammar_loads_into_a_parser() {
        for lang in [
            Lang::Python,
            Lang::JavaScript,
            Lang::TypeScript,
            Lang::Tsx,
            Lang::Go,
            Lang::Java,
            Lang::Rust,
        ] {
            let mut parser = tree_sitter::Parser::new();
            assert!(parser.set_language(&lang.grammar()).is_ok(), "{lang}");
        }
    }
}
