// ==========================================
// 会计数据导入管道 - Libro Diario 自动映射 (C4)
// ==========================================
// 职责: 关键字表 → {canonicalField: sourceColumn}
//       + 未映射列分析 + 必填字段检查
// ==========================================

use crate::domain::catalog::JournalCatalog;
use crate::domain::frame::Frame;
use crate::domain::mapping::{ColumnMapping, MappingResult};
use crate::importer::suggestions::{analyze_unmapped, assign_by_rules, KeywordRule};
use std::collections::HashSet;
use tracing::info;

// 顺序即同分优先级: 更具体的字段在前
pub const JOURNAL_RULES: &[KeywordRule] = &[
    KeywordRule {
        field: "entry_time",
        aliases: &["HORA", "HORA ASIENTO", "HORA REGISTRO", "ENTRY TIME", "TIME"],
        patterns: &[&["HORA"], &["TIME"]],
    },
    KeywordRule {
        field: "approved_date",
        aliases: &["FECHA APROBACION", "APPROVED DATE", "APPROVAL DATE"],
        patterns: &[&["FECHA", "APROB"], &["APPROV", "DATE"]],
    },
    KeywordRule {
        field: "posting_date",
        aliases: &[
            "FECHA CONTABLE",
            "FECHA CONTABILIZACION",
            "FECHA DE CONTABILIZACION",
            "FECHA REGISTRO",
            "FECHA VALOR",
            "POSTING DATE",
        ],
        patterns: &[&["FECHA", "CONTAB"], &["POSTING"]],
    },
    KeywordRule {
        field: "entry_date",
        aliases: &[
            "FECHA",
            "FECHA ASIENTO",
            "FECHA DOCUMENTO",
            "FECHA ENTRADA",
            "ENTRY DATE",
            "DATE",
        ],
        patterns: &[&["FECHA"], &["DATE"]],
    },
    KeywordRule {
        field: "line_number",
        aliases: &["LINEA", "NUM LINEA", "NUMERO LINEA", "N LINEA", "APUNTE", "N APUNTE", "LINE", "LINE NUMBER"],
        patterns: &[&["LINEA"], &["APUNTE"], &["LINE"]],
    },
    KeywordRule {
        field: "journal_entry_type",
        aliases: &["TIPO ASIENTO", "CLASE ASIENTO", "TIPO", "JOURNAL ENTRY TYPE"],
        patterns: &[&["TIPO", "ASIENTO"], &["CLASE", "ASIENTO"], &["ENTRY", "TYPE"]],
    },
    KeywordRule {
        field: "journal_entry_description",
        aliases: &["CONCEPTO ASIENTO", "DESCRIPCION ASIENTO", "GLOSA", "JOURNAL ENTRY DESCRIPTION"],
        patterns: &[&["DESCRIPCION", "ASIENTO"], &["CONCEPTO", "ASIENTO"], &["GLOSA"]],
    },
    KeywordRule {
        field: "gl_account_name",
        aliases: &["NOMBRE CUENTA", "DESCRIPCION CUENTA", "TITULO CUENTA", "ACCOUNT NAME", "GL ACCOUNT NAME"],
        patterns: &[&["NOMBRE", "CUENTA"], &["DESCRIPCION", "CUENTA"], &["TITULO", "CUENTA"], &["ACCOUNT", "NAME"]],
    },
    KeywordRule {
        field: "line_description",
        aliases: &["CONCEPTO", "DESCRIPCION", "DESCRIPCION LINEA", "TEXTO", "LINE DESCRIPTION", "DESCRIPTION"],
        patterns: &[&["CONCEPTO"], &["DESCRIPCION"], &["TEXTO"], &["DESCRIPTION"]],
    },
    KeywordRule {
        field: "gl_account_number",
        aliases: &[
            "CUENTA",
            "CTA",
            "SUBCUENTA",
            "NUM CUENTA",
            "NUMERO CUENTA",
            "CODIGO CUENTA",
            "CUENTA CONTABLE",
            "GL ACCOUNT",
            "GL ACCOUNT NUMBER",
            "ACCOUNT",
        ],
        patterns: &[&["CUENTA"], &["CTA"], &["ACCOUNT"]],
    },
    KeywordRule {
        field: "debit_credit_indicator",
        aliases: &["D/H", "DH", "D H", "DEBE/HABER", "DEBE HABER", "SIGNO", "INDICADOR", "INDICADOR DH"],
        patterns: &[&["DEBE", "HABER"], &["INDICADOR"], &["D/H"]],
    },
    KeywordRule {
        field: "debit_amount",
        aliases: &["DEBE", "DEBITO", "CARGO", "IMPORTE DEBE", "DEBIT", "DEBIT AMOUNT"],
        patterns: &[&["DEBE"], &["DEBITO"], &["CARGO"], &["DEBIT"]],
    },
    KeywordRule {
        field: "credit_amount",
        aliases: &["HABER", "CREDITO", "ABONO", "IMPORTE HABER", "CREDIT", "CREDIT AMOUNT"],
        patterns: &[&["HABER"], &["CREDITO"], &["ABONO"], &["CREDIT"]],
    },
    KeywordRule {
        field: "amount",
        aliases: &["IMPORTE", "MONTO", "VALOR", "SALDO", "IMPORTE MONEDA LOCAL", "AMOUNT"],
        patterns: &[&["IMPORTE"], &["MONTO"], &["AMOUNT"]],
    },
    KeywordRule {
        field: "fiscal_year",
        aliases: &["EJERCICIO", "ANO", "ANIO", "ANO FISCAL", "FISCAL YEAR", "YEAR"],
        patterns: &[&["EJERCICIO"], &["FISCAL", "YEAR"]],
    },
    KeywordRule {
        field: "period_number",
        aliases: &["PERIODO", "MES", "NUM PERIODO", "PERIOD", "PERIOD NUMBER"],
        patterns: &[&["PERIODO"], &["PERIOD"]],
    },
    KeywordRule {
        field: "approved_by",
        aliases: &["APROBADO POR", "USUARIO APROBACION", "APPROVED BY"],
        patterns: &[&["APROB"], &["APPROVED"]],
    },
    KeywordRule {
        field: "entered_by",
        aliases: &["USUARIO", "CREADO POR", "USUARIO CREACION", "ENTERED BY", "USER"],
        patterns: &[&["USUARIO"], &["CREADO"], &["ENTERED"]],
    },
    KeywordRule {
        field: "source",
        aliases: &["ORIGEN", "FUENTE", "DIARIO", "MODULO", "SOURCE"],
        patterns: &[&["ORIGEN"], &["FUENTE"]],
    },
    KeywordRule {
        field: "reversal_indicator",
        aliases: &["REVERSION", "ANULACION", "ANULADO", "REVERSAL"],
        patterns: &[&["REVERS"], &["ANUL"]],
    },
    KeywordRule {
        field: "manual_entry_indicator",
        aliases: &["MANUAL", "ASIENTO MANUAL", "MANUAL ENTRY"],
        patterns: &[&["MANUAL"]],
    },
    KeywordRule {
        field: "cost_center",
        aliases: &["CENTRO COSTE", "CENTRO DE COSTE", "CENTRO COSTO", "CENTRO DE COSTO", "CECO", "COST CENTER"],
        patterns: &[&["CENTRO", "COST"], &["CECO"], &["COST", "CENTER"]],
    },
    KeywordRule {
        field: "business_unit",
        aliases: &["UNIDAD NEGOCIO", "UNIDAD DE NEGOCIO", "SEGMENTO", "DIVISION", "BUSINESS UNIT"],
        patterns: &[&["UNIDAD", "NEGOCIO"], &["SEGMENTO"], &["BUSINESS", "UNIT"]],
    },
    KeywordRule {
        field: "currency_code",
        aliases: &["MONEDA", "DIVISA", "CURRENCY", "CURRENCY CODE"],
        patterns: &[&["MONEDA"], &["DIVISA"], &["CURRENCY"]],
    },
    KeywordRule {
        field: "third_party_id",
        aliases: &["TERCERO", "NIF", "CIF", "NIT", "RUT", "PROVEEDOR", "CLIENTE", "THIRD PARTY"],
        patterns: &[&["TERCERO"], &["NIF"], &["THIRD", "PARTY"]],
    },
    KeywordRule {
        field: "document_number",
        aliases: &["DOCUMENTO", "NUM DOCUMENTO", "NUMERO DOCUMENTO", "FACTURA", "REFERENCIA", "DOCUMENT NUMBER"],
        patterns: &[&["DOCUMENTO"], &["FACTURA"], &["DOCUMENT"]],
    },
    KeywordRule {
        field: "journal_entry_id",
        aliases: &[
            "ASIENTO",
            "NUM ASIENTO",
            "NUMERO ASIENTO",
            "N ASIENTO",
            "NO ASIENTO",
            "ID ASIENTO",
            "COMPROBANTE",
            "NUMERO COMPROBANTE",
            "JOURNAL ENTRY ID",
            "ENTRY ID",
            "JE ID",
        ],
        patterns: &[&["ASIENTO"], &["COMPROBANTE"], &["JOURNAL", "ID"]],
    },
];

/// 必填字段（每组任一即可）
const REQUIRED_GROUPS: &[(&str, &[&str])] = &[
    ("journal_entry_id", &["journal_entry_id"]),
    ("gl_account_number", &["gl_account_number"]),
    ("entry_date", &["entry_date", "posting_date"]),
    ("amount", &["amount", "debit_amount"]),
];

// ==========================================
// JournalMapper
// ==========================================
pub struct JournalMapper<'a> {
    catalog: &'a JournalCatalog,
}

impl<'a> JournalMapper<'a> {
    pub fn new(catalog: &'a JournalCatalog) -> Self {
        Self { catalog }
    }

    /// 自动映射
    ///
    /// # 参数
    /// - frame: 源数据帧
    ///
    /// # 返回
    /// - MappingResult: 映射 + 未映射列分析 + 缺失必填字段
    pub fn auto_map(&self, frame: &Frame) -> MappingResult {
        let rules: Vec<KeywordRule> = JOURNAL_RULES
            .iter()
            .filter(|r| self.catalog.contains(r.field))
            .copied()
            .collect();

        let mut mapping = ColumnMapping::default();
        assign_by_rules(frame.column_names(), &rules, &mut mapping);

        let unmapped = analyze_unmapped(frame, &mapping, &rules, &HashSet::new());
        let missing = missing_required(&mapping);

        info!(
            mapped = mapping.len(),
            unmapped = unmapped.len(),
            missing = ?missing,
            "Libro Diario 自动映射完成"
        );

        MappingResult {
            mapping,
            unmapped_columns: unmapped,
            missing_required_fields: missing,
            header_row: None,
            source_columns: frame.column_names().to_vec(),
        }
    }
}

/// 缺失的必填字段；金额组要求 amount 或 借+贷 同时存在
pub fn missing_required(mapping: &ColumnMapping) -> Vec<String> {
    REQUIRED_GROUPS
        .iter()
        .filter(|(name, alternatives)| {
            if *name == "amount" {
                let has_amount = mapping.source_for("amount").is_some();
                let has_pair = mapping.source_for("debit_amount").is_some()
                    && mapping.source_for("credit_amount").is_some();
                return !(has_amount || has_pair);
            }
            !alternatives.iter().any(|f| mapping.source_for(f).is_some())
        })
        .map(|(name, _)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(columns: &[&str]) -> Frame {
        Frame::from_columns(
            columns
                .iter()
                .map(|c| (c.to_string(), vec!["x".to_string()]))
                .collect(),
        )
    }

    #[test]
    fn test_typical_spanish_export() {
        let catalog = JournalCatalog::builtin();
        let frame = frame_with(&[
            "Nº Asiento",
            "Fecha",
            "Cuenta",
            "Descripción cuenta",
            "Concepto",
            "Debe",
            "Haber",
            "Línea",
        ]);
        let result = JournalMapper::new(&catalog).auto_map(&frame);
        let m = result.canonical_to_source();

        assert_eq!(m.get("journal_entry_id").map(String::as_str), Some("Nº Asiento"));
        assert_eq!(m.get("entry_date").map(String::as_str), Some("Fecha"));
        assert_eq!(m.get("gl_account_number").map(String::as_str), Some("Cuenta"));
        assert_eq!(m.get("gl_account_name").map(String::as_str), Some("Descripción cuenta"));
        assert_eq!(m.get("line_description").map(String::as_str), Some("Concepto"));
        assert_eq!(m.get("debit_amount").map(String::as_str), Some("Debe"));
        assert_eq!(m.get("credit_amount").map(String::as_str), Some("Haber"));
        assert_eq!(m.get("line_number").map(String::as_str), Some("Línea"));
        assert!(result.missing_required_fields.is_empty());
        assert!(result.mapping.has_unique_targets());
    }

    #[test]
    fn test_canonical_headers_map_directly() {
        let catalog = JournalCatalog::builtin();
        let frame = frame_with(&["journal_entry_id", "posting_date", "gl_account_number", "amount"]);
        let result = JournalMapper::new(&catalog).auto_map(&frame);
        assert_eq!(result.mapping.len(), 4);
        assert!(!result.requires_manual_mapping());
    }

    #[test]
    fn test_unknown_columns_are_surfaced() {
        let catalog = JournalCatalog::builtin();
        let frame = frame_with(&["Asiento", "Fecha", "Cuenta", "Importe", "Proyecto interno"]);
        let result = JournalMapper::new(&catalog).auto_map(&frame);
        assert_eq!(result.unmapped_count(), 1);
        assert_eq!(result.unmapped_columns[0].column_name, "Proyecto interno");
        assert!(result.requires_manual_mapping());
    }

    #[test]
    fn test_missing_amount_group() {
        let catalog = JournalCatalog::builtin();
        let frame = frame_with(&["Asiento", "Fecha", "Cuenta", "Debe"]);
        let result = JournalMapper::new(&catalog).auto_map(&frame);
        assert_eq!(result.missing_required_fields, vec!["amount".to_string()]);
    }
}
