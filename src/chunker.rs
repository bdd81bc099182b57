//! Troceado de ficheros en ventanas de tamaño fijo con solapamiento.
//!
//! Las ventanas se miden en caracteres (no en bytes) para no partir nunca un
//! carácter UTF-8. Cada trozo tiene una identidad estable derivada de
//! `(ruta, índice)`, de modo que reingerir el mismo fichero sobrescribe los
//! puntos existentes en lugar de duplicarlos.

use uuid::Uuid;

/// Tamaño de ventana en caracteres.
pub const CHUNK_SIZE: usize = 800;
/// Desplazamiento entre ventanas consecutivas (200 caracteres de solape).
pub const CHUNK_STRIDE: usize = 600;

/// Un trozo de un fichero listo para embeber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    /// Posición (en caracteres) del primer carácter del trozo.
    pub start_char: usize,
    /// Línea (base 1) donde empieza el trozo.
    pub line_start: usize,
    pub text: String,
}

/// Divide `content` en ventanas `content[i..i+W]` para `i = 0, S, 2S, ...`.
///
/// Devuelve una lista vacía si el contenido está vacío o sólo tiene espacios.
pub fn chunk_content(content: &str) -> Vec<TextChunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    // Offsets en bytes de cada carácter, más el final del texto.
    let mut offsets: Vec<usize> = content.char_indices().map(|(i, _)| i).collect();
    let total_chars = offsets.len();
    offsets.push(content.len());

    let mut chunks = Vec::new();
    let mut line = 1;
    let mut line_counted_until = 0;

    for (index, start) in (0..total_chars).step_by(CHUNK_STRIDE).enumerate() {
        let end = (start + CHUNK_SIZE).min(total_chars);
        let (start_byte, end_byte) = (offsets[start], offsets[end]);

        line += content[line_counted_until..start_byte].matches('\n').count();
        line_counted_until = start_byte;

        chunks.push(TextChunk {
            index,
            start_char: start,
            line_start: line,
            text: content[start_byte..end_byte].to_string(),
        });
    }

    chunks
}

/// Texto del registro "fichero completo": los primeros `CHUNK_SIZE` caracteres.
pub fn full_file_text(content: &str) -> &str {
    match content.char_indices().nth(CHUNK_SIZE) {
        Some((byte_idx, _)) => &content[..byte_idx],
        None => content,
    }
}

/// Identidad determinista del punto de un trozo.
pub fn chunk_point_id(rel_path: &str, index: usize) -> String {
    point_id(&format!("{rel_path}#{index}"))
}

/// Identidad determinista del punto "fichero completo".
pub fn full_file_point_id(rel_path: &str) -> String {
    point_id(&format!("{rel_path}#FULL"))
}

fn point_id(key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}
