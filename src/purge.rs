//! Borrado de todos los datos de un repositorio (Qdrant, Neo4j y fila `repos`).
//!
//! Cada almacén se borra de forma independiente: un fallo se registra y se
//! refleja en el informe, pero no impide borrar en los demás. La fila
//! relacional se borra la última para conservar el diagnóstico si algo falla.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{app_state::Services, models::collection_name_for};

/// Resultado del borrado en cada almacén.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub relational: bool,
    pub vector: bool,
    pub graph: bool,
    /// Error de la base de datos relacional, si la fila no se pudo borrar.
    #[serde(skip)]
    pub relational_error: Option<String>,
}

impl DeletionReport {
    /// El borrado se considera correcto si desaparece la fila del repositorio.
    pub fn success(&self) -> bool {
        self.relational
    }
}

pub async fn delete_repository(services: &Services, repo_id: Uuid) -> DeletionReport {
    // La colección registrada en la fila, o la canónica si no la hay
    let collection = match services.repos.get(repo_id).await {
        Ok(Some(repo)) => repo
            .vector_collection
            .clone()
            .unwrap_or_else(|| repo.collection_name()),
        Ok(None) => collection_name_for(repo_id),
        Err(e) => {
            warn!("No se pudo leer el repositorio {repo_id} antes de borrarlo: {e}");
            collection_name_for(repo_id)
        }
    };

    let vector = match services.vectors.delete_collection(&collection).await {
        Ok(true) => true,
        Ok(false) => {
            warn!("La colección '{collection}' no existía.");
            false
        }
        Err(e) => {
            warn!("Fallo borrando la colección '{collection}': {e}");
            false
        }
    };

    let graph = match services.graph.delete_repo(repo_id).await {
        Ok(nodes) => {
            info!("Subgrafo de {repo_id} eliminado ({nodes} nodos).");
            true
        }
        Err(e) => {
            warn!("Fallo borrando el subgrafo de {repo_id}: {e}");
            false
        }
    };

    let (relational, relational_error) = match services.repos.delete(repo_id).await {
        Ok(deleted) => (deleted, None),
        Err(e) => {
            warn!("Fallo borrando la fila de {repo_id}: {e}");
            (false, Some(e.to_string()))
        }
    };

    let report = DeletionReport {
        relational,
        vector,
        graph,
        relational_error,
    };
    info!("Borrado del repositorio {repo_id}: {report:?}");
    report
}
