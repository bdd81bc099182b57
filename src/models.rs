//! Modelos de dominio (repositorios, ficheros y hechos estructurales del grafo).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Estado del ciclo de vida de un repositorio en la tabla `repos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Pending,
    Queued,
    Cloning,
    Ready,
    Error,
}

impl RepoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Cloning => "cloning",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "cloning" => Ok(Self::Cloning),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            other => Err(format!("Estado de repositorio desconocido: {other}")),
        }
    }
}

/// Fila de la tabla `repos`. La crea un sistema externo antes de la ingesta.
#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    pub branch: String,
    pub status: RepoStatus,
    pub error_message: Option<String>,
    pub vector_collection: Option<String>,
}

impl Repository {
    /// Nombre de la colección vectorial asociada al repositorio.
    pub fn collection_name(&self) -> String {
        collection_name_for(self.id)
    }
}

pub fn collection_name_for(repo_id: Uuid) -> String {
    format!("repo_{repo_id}")
}

/// Representa un nodo (:File) en Neo4j.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub path: String,
    pub language: String,
    pub lines: i64,
}

/// Tipo de declaración: funciones/métodos o construcciones "tipo clase".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Function,
    Class,
}

impl DeclKind {
    /// Etiqueta del nodo en el grafo.
    pub fn label(self) -> &'static str {
        match self {
            Self::Function => "Function",
            Self::Class => "Class",
        }
    }
}

/// Hecho sintáctico extraído de un fichero fuente.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CodeFact {
    /// Declaración con nombre (`CONTAINS` desde el fichero).
    Declaration {
        kind: DeclKind,
        name: String,
        node_kind: String,
        line: i64,
    },
    /// Llamada sin cualificar a una función (`CALLS` desde el fichero).
    Call { callee: String },
}

/// Todo lo que se fusiona en el grafo para un fichero.
#[derive(Debug, Clone)]
pub struct FileGraph {
    pub file: FileNode,
    pub facts: Vec<CodeFact>,
}

/// Tripleta (fichero, etiqueta, nombre) devuelta por la expansión del grafo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRelation {
    pub path: String,
    pub label: String,
    pub name: Option<String>,
}
