//! Analysis categories and prefix-based routing.
//!
//! Each document prefix (the portion of the file name before the first
//! `-`) determines which extraction categories apply. The routing table
//! is static and exhaustive: an unknown prefix routes to no category and
//! the document is skipped, never failed.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// An extraction category. Each category carries its own analyst prompt
/// and produces its own result set under `{project}/results/{category}.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Audit,
    Product,
    Disbursement,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Audit, Category::Product, Category::Disbursement];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Audit => "audit",
            Category::Product => "product",
            Category::Disbursement => "disbursement",
        }
    }

    pub fn parse(s: &str) -> Result<Category> {
        match s {
            "audit" => Ok(Category::Audit),
            "product" => Ok(Category::Product),
            "disbursement" => Ok(Category::Disbursement),
            other => bail!("Unknown category: {}", other),
        }
    }

    /// Document prefixes this category accepts.
    pub fn allowed_prefixes(self) -> &'static [&'static str] {
        match self {
            Category::Audit => &["IXP"],
            Category::Product => &["ROP", "INI", "DEC", "IFS"],
            Category::Disbursement => &["ROP", "INI", "DEC"],
        }
    }

    /// The analyst prompt prepended to each chunk for this category.
    pub fn prompt(self) -> &'static str {
        match self {
            Category::Audit => PROMPT_AUDIT,
            Category::Product => PROMPT_PRODUCT,
            Category::Disbursement => PROMPT_DISBURSEMENT,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System message shared by every request regardless of category.
pub const SYSTEM_PROMPT: &str = "Eres un Analista experto en documentos de auditoría. \
    Tu tarea es extraer información específica siguiendo un formato estructurado y \
    emitiendo conceptos normalizados para entregar en formato JSON lo solicitado.";

const PROMPT_AUDIT: &str = "Prompt — Agente Auditoría\n\
    Eres un Analista experto en documentos de auditoría. Extrae todas las variables \
    del formato Auditorías priorizando archivos IXP, normalizando los campos \
    categóricos y emitiendo un concepto final (Favorable / Favorable con reservas / \
    Desfavorable) con justificación.\n\
    Secciones válidas de concepto: Opinión, Opinión sin reserva/sin salvedades, \
    Dictamen, Conclusión de auditoría (acepta variantes ES/PT/EN).\n\
    Si falta evidencia para un campo, responde \"NO EXTRAIDO\".\n\
    Salida en JSON con: Código CFA, Estado del informe, Concepto Control interno, \
    Concepto uso de recursos financieros, Concepto sobre unidad ejecutora, Fecha de \
    vencimiento, status auditoría, código CFX, Nombre del archivo revisado, \
    Observación, concepto_final, concepto_rationale.";

const PROMPT_PRODUCT: &str = "Prompt — Agente Productos\n\
    Eres un Analista de Cartera experto en seguimiento de documentos de proyectos. \
    Identifica todos los productos comprometidos en el proyecto y genera una fila \
    por producto, priorizando fuentes y separando meta (número) y unidad \
    (\"230 km\" → meta=\"230\", unidad=\"km\"). Valida que cada registro sea un \
    producto y no un resultado. Si la separación no es inequívoca, responde \
    \"NO EXTRAIDO\".\n\
    Salida en JSON, una fila por producto: Código CFA, descripción de producto, \
    meta del producto, meta unidad, fuente del indicador, fecha cumplimiento de \
    meta, check_producto, código CFX, Nombre del archivo revisado, Retraso, \
    Observación, meta_num, meta_unidad_norm, concepto_final, concepto_rationale.";

const PROMPT_DISBURSEMENT: &str = "Prompt — Agente Desembolsos\n\
    Eres un analista de cartera experto en seguimiento de desembolsos. Extrae \
    desembolsos proyectados y realizados, con tabla-primero, deduplicando por \
    período+moneda y sin convertir moneda. Normaliza la fuente: Realizado → \
    \"Detalle/Estado de desembolsos\"; Proyectado → \"Cronograma/Programación/\
    Calendario de desembolsos\", \"Flujo de caja\".\n\
    Si falta evidencia, responde \"NO EXTRAIDO\".\n\
    Salida en JSON: Código de operación (CFX), fecha de desembolso por parte de \
    CAF, monto desembolsado CAF, monto desembolsado CAF USD, fuente CAF \
    proyectado, Nombre del archivo revisado, Observación, fuente_norm, \
    concepto_final, concepto_rationale.";

/// Derive the routing prefix from a document name: the portion before the
/// first `-`, upper-cased; without a `-`, the first three characters. A
/// `_chunk_NNN` suffix is stripped first so chunk-derived names route the
/// same as their document.
pub fn document_prefix(document_name: &str) -> String {
    let base = match document_name.find("_chunk_") {
        Some(pos) => &document_name[..pos],
        None => document_name,
    };
    match base.find('-') {
        Some(pos) => base[..pos].to_uppercase(),
        None => base.chars().take(3).collect::<String>().to_uppercase(),
    }
}

/// Categories applicable to a document, in `Category::ALL` order. Empty
/// for unrecognized prefixes.
pub fn applicable_categories(document_name: &str) -> Vec<Category> {
    let prefix = document_prefix(document_name);
    Category::ALL
        .into_iter()
        .filter(|c| c.allowed_prefixes().contains(&prefix.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_before_first_dash() {
        assert_eq!(document_prefix("IXP-2024-001"), "IXP");
        assert_eq!(document_prefix("rop-CFA009660"), "ROP");
    }

    #[test]
    fn test_prefix_without_dash_first_three() {
        assert_eq!(document_prefix("informe"), "INF");
        assert_eq!(document_prefix("ab"), "AB");
    }

    #[test]
    fn test_prefix_strips_chunk_suffix() {
        assert_eq!(document_prefix("IXP-2024_chunk_003"), "IXP");
        assert_eq!(document_prefix("decreto_chunk_001"), "DEC");
    }

    #[test]
    fn test_ixp_routes_to_audit_only() {
        assert_eq!(applicable_categories("IXP-2024-001"), vec![Category::Audit]);
    }

    #[test]
    fn test_rop_routes_to_product_and_disbursement() {
        assert_eq!(
            applicable_categories("ROP-CFA009660"),
            vec![Category::Product, Category::Disbursement]
        );
    }

    #[test]
    fn test_ifs_routes_to_product_only() {
        assert_eq!(applicable_categories("IFS-01"), vec![Category::Product]);
    }

    #[test]
    fn test_unknown_prefix_routes_nowhere() {
        assert!(applicable_categories("ZZZ-doc").is_empty());
    }

    #[test]
    fn test_category_parse_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::parse(c.as_str()).unwrap(), c);
        }
        assert!(Category::parse("unknown").is_err());
    }
}
