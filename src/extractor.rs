//! Extracción estructural con tree-sitter: declaraciones y llamadas.
//!
//! Sólo es análisis sintáctico. Las llamadas se resuelven por nombre sin
//! cualificar, así que dos funciones homónimas en ficheros distintos acaban
//! apuntando al mismo nodo llamado.

use std::collections::HashSet;

use tree_sitter::{Node, Parser, Tree};

use crate::error::AppError;
use crate::languages::Lang;
use crate::models::{CodeFact, DeclKind};

impl Lang {
    /// Parsea `source` con la gramática del lenguaje.
    pub fn parse(self, path: &str, source: &str) -> Result<Tree, AppError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar())
            .map_err(|e| AppError::Parse {
                path: path.to_string(),
                reason: format!("set_language falló: {e}"),
            })?;

        parser.parse(source, None).ok_or_else(|| AppError::Parse {
            path: path.to_string(),
            reason: "el parser no devolvió árbol".to_string(),
        })
    }

    /// Recorre el árbol y devuelve los hechos en orden de aparición.
    ///
    /// Una declaración repetida en el mismo fichero (p. ej. sobrecargas) sólo se
    /// emite la primera vez, igual que cada callee distinto.
    pub fn extract(self, tree: &Tree, source: &str) -> Vec<CodeFact> {
        let mut facts = Vec::new();
        let mut seen: HashSet<(Option<DeclKind>, String)> = HashSet::new();
        let mut cursor = tree.walk();

        'walk: loop {
            if let Some(fact) = classify(self, cursor.node(), source.as_bytes()) {
                let key = match &fact {
                    CodeFact::Declaration { kind, name, .. } => (Some(*kind), name.clone()),
                    CodeFact::Call { callee } => (None, callee.clone()),
                };
                if seen.insert(key) {
                    facts.push(fact);
                }
            }

            if cursor.goto_first_child() || cursor.goto_next_sibling() {
                continue;
            }
            loop {
                if !cursor.goto_parent() {
                    break 'walk;
                }
                if cursor.goto_next_sibling() {
                    break;
                }
            }
        }

        facts
    }
}

/// Parsea y extrae en un solo paso.
pub fn extract_structure(lang: Lang, path: &str, source: &str) -> Result<Vec<CodeFact>, AppError> {
    let tree = lang.parse(path, source)?;
    Ok(lang.extract(&tree, source))
}

/// Tabla por lenguaje: tipo de nodo con nombre → hecho emitido.
/// Si el nodo no tiene hijo con nombre, el hecho se descarta sin error.
fn classify(lang: Lang, node: Node<'_>, src: &[u8]) -> Option<CodeFact> {
    let kind = node.kind();
    match lang {
        Lang::Python => match kind {
            "function_definition" => declaration(DeclKind::Function, node, field_text(node, "name", src)?),
            "class_definition" => declaration(DeclKind::Class, node, field_text(node, "name", src)?),
            "call" => identifier_call(node, "function", src),
            _ => None,
        },
        Lang::JavaScript | Lang::TypeScript | Lang::Tsx => match kind {
            "function_declaration"
            | "generator_function_declaration"
            | "function_expression"
            | "function"
            | "method_definition" => {
                declaration(DeclKind::Function, node, field_text(node, "name", src)?)
            }
            "variable_declarator" => {
                let value = node.child_by_field_name("value")?;
                if matches!(value.kind(), "arrow_function" | "function_expression" | "function") {
                    declaration(DeclKind::Function, node, field_text(node, "name", src)?)
                } else {
                    None
                }
            }
            "class_declaration" | "abstract_class_declaration" => {
                declaration(DeclKind::Class, node, field_text(node, "name", src)?)
            }
            "call_expression" => identifier_call(node, "function", src),
            _ => None,
        },
        Lang::Java => match kind {
            "method_declaration" => declaration(DeclKind::Function, node, field_text(node, "name", src)?),
            "class_declaration" | "interface_declaration" => {
                declaration(DeclKind::Class, node, field_text(node, "name", src)?)
            }
            // Sólo invocaciones sin receptor: `foo()` y no `obj.foo()`.
            "method_invocation" if node.child_by_field_name("object").is_none() => {
                Some(CodeFact::Call {
                    callee: field_text(node, "name", src)?,
                })
            }
            _ => None,
        },
        Lang::Go => match kind {
            "function_declaration" | "method_declaration" => {
                declaration(DeclKind::Function, node, field_text(node, "name", src)?)
            }
            // `type_declaration` no tiene nombre propio; el nombre vive en cada `type_spec`.
            "type_spec" => {
                let ty = node.child_by_field_name("type")?;
                if matches!(ty.kind(), "struct_type" | "interface_type") {
                    declaration(DeclKind::Class, node, field_text(node, "name", src)?)
                } else {
                    None
                }
            }
            "call_expression" => identifier_call(node, "function", src),
            _ => None,
        },
        Lang::Rust => match kind {
            "function_item" | "function_signature_item" => {
                declaration(DeclKind::Function, node, field_text(node, "name", src)?)
            }
            "struct_item" | "enum_item" | "trait_item" => {
                declaration(DeclKind::Class, node, field_text(node, "name", src)?)
            }
            "impl_item" => {
                let ty = node.child_by_field_name("type")?;
                declaration(DeclKind::Class, node, rust_type_name(ty, src)?)
            }
            "call_expression" => identifier_call(node, "function", src),
            _ => None,
        },
    }
}

fn declaration(kind: DeclKind, node: Node<'_>, name: String) -> Option<CodeFact> {
    let line = i64::try_from(node.start_position().row + 1).ok()?;
    Some(CodeFact::Declaration {
        kind,
        name,
        node_kind: node.kind().to_string(),
        line,
    })
}

/// Llamada cuyo callee es un identificador simple.
fn identifier_call(node: Node<'_>, field: &str, src: &[u8]) -> Option<CodeFact> {
    let callee = node.child_by_field_name(field)?;
    if callee.kind() != "identifier" {
        return None;
    }
    Some(CodeFact::Call {
        callee: node_text(callee, src)?,
    })
}

/// Nombre del tipo implementado en un bloque `impl`: `Foo<T>` → `Foo`, `a::Foo` → `Foo`.
fn rust_type_name(ty: Node<'_>, src: &[u8]) -> Option<String> {
    match ty.kind() {
        "generic_type" => rust_type_name(ty.child_by_field_name("type")?, src),
        "scoped_type_identifier" => field_text(ty, "name", src),
        _ => node_text(ty, src),
    }
}

fn field_text(node: Node<'_>, field: &str, src: &[u8]) -> Option<String> {
    node_text(node.child_by_field_name(field)?, src)
}

fn node_text(node: Node<'_>, src: &[u8]) -> Option<String> {
    let text = node.utf8_text(src).ok()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}
