// ==========================================
// 会计数据导入管道 - 字段目录
// ==========================================
// 职责: Libro Diario 目录（header_fields / detail_fields）与
//       Sumas y Saldos 目录（fields）的强类型表示
// 红线: 进程级只读，启动时加载一次
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

const BUILTIN_JOURNAL_CATALOG: &str = include_str!("../../catalogs/journal_entries.json");
const BUILTIN_TRIAL_BALANCE_CATALOG: &str = include_str!("../../catalogs/trial_balance.json");

// ==========================================
// FieldType - 目标字段类型
// ==========================================
// 文本形式: decimal(p,s) / date / time / int / bit / nvarchar(n) / varchar(n) / char(n)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Decimal { precision: u32, scale: u32 },
    Date,
    Time,
    Int,
    Bit,
    String { max_len: Option<usize> },
    Other(String),
}

impl FieldType {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        let (base, args) = match lower.find('(') {
            Some(idx) => {
                let inner = lower[idx + 1..].trim_end_matches(')');
                (lower[..idx].trim(), Some(inner.to_string()))
            }
            None => (lower.as_str(), None),
        };

        match base {
            "decimal" | "numeric" => {
                let mut parts = args
                    .as_deref()
                    .unwrap_or("")
                    .split(',')
                    .map(|p| p.trim().parse::<u32>().ok());
                let precision = parts.next().flatten().unwrap_or(18);
                let scale = parts.next().flatten().unwrap_or(2);
                FieldType::Decimal { precision, scale }
            }
            "date" => FieldType::Date,
            "time" => FieldType::Time,
            "int" | "integer" | "bigint" | "smallint" => FieldType::Int,
            "bit" | "bool" | "boolean" => FieldType::Bit,
            "nvarchar" | "varchar" | "char" | "nchar" | "string" | "text" => FieldType::String {
                // max 或非数字长度视为不截断
                max_len: args.and_then(|a| a.trim().parse::<usize>().ok()),
            },
            _ => FieldType::Other(raw.trim().to_string()),
        }
    }
}

impl From<String> for FieldType {
    fn from(value: String) -> Self {
        FieldType::parse(&value)
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            FieldType::Date => write!(f, "date"),
            FieldType::Time => write!(f, "time"),
            FieldType::Int => write!(f, "int"),
            FieldType::Bit => write!(f, "bit"),
            FieldType::String { max_len: Some(n) } => write!(f, "nvarchar({})", n),
            FieldType::String { max_len: None } => write!(f, "nvarchar(max)"),
            FieldType::Other(raw) => write!(f, "{}", raw),
        }
    }
}

// ==========================================
// FieldDefinition - 目录条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldDefinition {
    pub fn new(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::parse(field_type),
        }
    }
}

// ==========================================
// JournalCatalog - Libro Diario 目录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalCatalog {
    pub header_fields: Vec<FieldDefinition>,
    pub detail_fields: Vec<FieldDefinition>,
}

#[derive(Debug, Deserialize)]
struct JournalCatalogDocument {
    journal_entries: JournalCatalog,
}

impl JournalCatalog {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let doc: JournalCatalogDocument = serde_json::from_str(raw)?;
        Ok(doc.journal_entries)
    }

    pub fn builtin() -> Self {
        // 内置目录随编译期校验，解析失败属于程序错误
        Self::from_json(BUILTIN_JOURNAL_CATALOG).expect("内置 Libro Diario 目录格式错误")
    }

    /// 扁平规范列：header 在前，detail 在后，按名称去重
    pub fn all_fields(&self) -> Vec<&FieldDefinition> {
        let mut seen = HashSet::new();
        self.header_fields
            .iter()
            .chain(self.detail_fields.iter())
            .filter(|f| seen.insert(f.name.as_str()))
            .collect()
    }

    pub fn all_field_names(&self) -> Vec<String> {
        self.all_fields().into_iter().map(|f| f.name.clone()).collect()
    }

    pub fn header_names(&self) -> Vec<String> {
        self.header_fields.iter().map(|f| f.name.clone()).collect()
    }

    /// detail 文件列：journal_entry_id 在首位，其后为 detail_fields
    pub fn detail_names_with_entry_id(&self) -> Vec<String> {
        let mut names = vec!["journal_entry_id".to_string()];
        names.extend(
            self.detail_fields
                .iter()
                .filter(|f| f.name != "journal_entry_id")
                .map(|f| f.name.clone()),
        );
        names
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.header_fields
            .iter()
            .chain(self.detail_fields.iter())
            .find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

// ==========================================
// TrialBalanceCatalog - Sumas y Saldos 目录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialBalanceCatalog {
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Deserialize)]
struct TrialBalanceCatalogDocument {
    trial_balance: TrialBalanceCatalog,
}

impl TrialBalanceCatalog {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let doc: TrialBalanceCatalogDocument = serde_json::from_str(raw)?;
        Ok(doc.trial_balance)
    }

    pub fn builtin() -> Self {
        Self::from_json(BUILTIN_TRIAL_BALANCE_CATALOG).expect("内置 Sumas y Saldos 目录格式错误")
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

// ==========================================
// FieldCatalogs - 两份目录的组合
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCatalogs {
    pub journal: JournalCatalog,
    pub trial_balance: TrialBalanceCatalog,
}

impl FieldCatalogs {
    pub fn builtin() -> Self {
        Self {
            journal: JournalCatalog::builtin(),
            trial_balance: TrialBalanceCatalog::builtin(),
        }
    }

    /// 从文件加载（None → 使用内置目录）
    pub fn load(
        journal_path: Option<&Path>,
        trial_balance_path: Option<&Path>,
    ) -> Result<Self, CatalogLoadError> {
        let journal = match journal_path {
            Some(path) => JournalCatalog::from_json(&read_catalog(path)?)
                .map_err(|e| CatalogLoadError::Invalid(path.display().to_string(), e.to_string()))?,
            None => JournalCatalog::builtin(),
        };
        let trial_balance = match trial_balance_path {
            Some(path) => TrialBalanceCatalog::from_json(&read_catalog(path)?)
                .map_err(|e| CatalogLoadError::Invalid(path.display().to_string(), e.to_string()))?,
            None => TrialBalanceCatalog::builtin(),
        };
        Ok(Self {
            journal,
            trial_balance,
        })
    }
}

fn read_catalog(path: &Path) -> Result<String, CatalogLoadError> {
    if !path.exists() {
        return Err(CatalogLoadError::Missing(path.display().to_string()));
    }
    std::fs::read_to_string(path)
        .map_err(|e| CatalogLoadError::Invalid(path.display().to_string(), e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogLoadError {
    #[error("字段目录文件不存在: {0}")]
    Missing(String),

    #[error("字段目录格式错误 ({0}): {1}")]
    Invalid(String, String),
}
