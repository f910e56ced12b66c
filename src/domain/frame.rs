// ==========================================
// 会计数据导入管道 - 列式数据帧
// ==========================================
// 职责: 有序列名 + 每列一个 Vec<String>
// 说明: 所有转换都是逐列映射或逐行校验，不需要完整的 DataFrame 库
// 类型标记: 与 data 同形的 numeric 记录解析器给出的数值单元格
// ==========================================

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    data: Vec<Vec<String>>,
    numeric: Vec<Vec<bool>>,
    rows: usize,
}

impl Frame {
    /// 由行式数据构造（短行补空，长行截断）
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self::from_typed_rows(columns, rows, Vec::new())
    }

    /// 带数值标记的行式构造，flags 缺失的单元格视为文本
    pub fn from_typed_rows(
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
        flags: Vec<Vec<bool>>,
    ) -> Self {
        let width = columns.len();
        let mut data: Vec<Vec<String>> = (0..width).map(|_| Vec::with_capacity(rows.len())).collect();
        let mut numeric: Vec<Vec<bool>> = (0..width).map(|_| Vec::with_capacity(rows.len())).collect();
        let row_count = rows.len();
        let mut flags = flags.into_iter();
        for row in rows {
            let mut iter = row.into_iter();
            let mut row_flags = flags.next().unwrap_or_default().into_iter();
            for (col, marks) in data.iter_mut().zip(numeric.iter_mut()) {
                col.push(iter.next().unwrap_or_default());
                marks.push(row_flags.next().unwrap_or(false));
            }
        }
        Self {
            columns,
            data,
            numeric,
            rows: row_count,
        }
    }

    /// 由列式数据构造（各列长度须一致，以最长列为准补空）
    pub fn from_columns(columns: Vec<(String, Vec<String>)>) -> Self {
        let rows = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        let mut names = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        for (name, mut values) in columns {
            values.resize(rows, String::new());
            names.push(name);
            data.push(values);
        }
        let numeric = vec![vec![false; rows]; names.len()];
        Self {
            columns: names,
            data,
            numeric,
            rows,
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// 列存在且至少有一个非空单元格
    pub fn has_values(&self, name: &str) -> bool {
        self.column(name)
            .map(|col| col.iter().any(|v| !v.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.column_index(name).map(|idx| self.data[idx].as_slice())
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        match self.column_index(name) {
            Some(idx) => Some(&mut self.data[idx]),
            None => None,
        }
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        self.column(name).and_then(|col| col.get(row)).map(|s| s.as_str())
    }

    /// 单元格是否为解析器给出的数值（规范十进制文本）
    pub fn is_numeric(&self, row: usize, name: &str) -> bool {
        self.column_index(name)
            .and_then(|idx| self.numeric[idx].get(row))
            .copied()
            .unwrap_or(false)
    }

    /// 整列标记为规范数值
    pub fn mark_numeric(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            self.numeric[idx] = vec![true; self.rows];
        }
    }

    /// 列值与数值标记（克隆）
    fn typed_column(&self, name: &str) -> Option<(Vec<String>, Vec<bool>)> {
        let idx = self.column_index(name)?;
        Some((self.data[idx].clone(), self.numeric[idx].clone()))
    }

    /// 新增或替换整列
    pub fn set_column(&mut self, name: &str, mut values: Vec<String>) {
        if self.columns.is_empty() && self.rows == 0 {
            self.rows = values.len();
        }
        values.resize(self.rows, String::new());
        match self.column_index(name) {
            Some(idx) => {
                self.data[idx] = values;
                self.numeric[idx] = vec![false; self.rows];
            }
            None => {
                self.columns.push(name.to_string());
                self.data.push(values);
                self.numeric.push(vec![false; self.rows]);
            }
        }
    }

    /// 在指定列之后插入新列（已存在则替换）
    pub fn insert_column_after(&mut self, anchor: &str, name: &str, mut values: Vec<String>) {
        values.resize(self.rows, String::new());
        if let Some(idx) = self.column_index(name) {
            self.data[idx] = values;
            self.numeric[idx] = vec![false; self.rows];
            return;
        }
        let pos = self
            .column_index(anchor)
            .map(|i| i + 1)
            .unwrap_or(self.columns.len());
        self.columns.insert(pos, name.to_string());
        self.data.insert(pos, values);
        self.numeric.insert(pos, vec![false; self.rows]);
    }

    pub fn drop_column(&mut self, name: &str) -> Option<Vec<String>> {
        let idx = self.column_index(name)?;
        self.columns.remove(idx);
        self.numeric.remove(idx);
        Some(self.data.remove(idx))
    }

    /// 由 (列名, 值, 标记) 组装，行数固定为 rows
    fn assemble(rows: usize, columns: Vec<(String, Vec<String>, Vec<bool>)>) -> Frame {
        let mut frame = Frame {
            rows,
            ..Frame::default()
        };
        for (name, mut values, mut marks) in columns {
            values.resize(rows, String::new());
            marks.resize(rows, false);
            frame.columns.push(name);
            frame.data.push(values);
            frame.numeric.push(marks);
        }
        frame
    }

    /// 按映射重命名，仅保留映射内的列（source → target）
    pub fn rename_and_select(&self, mapping: &[(String, String)]) -> Frame {
        let mut out = Vec::with_capacity(mapping.len());
        let mut used = HashSet::new();
        for (source, target) in mapping {
            if !used.insert(target.clone()) {
                continue;
            }
            if let Some((values, marks)) = self.typed_column(source) {
                out.push((target.clone(), values, marks));
            }
        }
        Frame::assemble(self.rows, out)
    }

    /// 投影到给定列顺序，缺失列以空字符串补齐
    pub fn project(&self, names: &[String]) -> Frame {
        let columns = names
            .iter()
            .map(|name| {
                let (values, marks) = self
                    .typed_column(name)
                    .unwrap_or_else(|| (vec![String::new(); self.rows], vec![false; self.rows]));
                (name.clone(), values, marks)
            })
            .collect();
        Frame::assemble(self.rows, columns)
    }

    /// 按行号序列重排（行号须为排列）
    pub fn reorder(&mut self, order: &[usize]) {
        for col in self.data.iter_mut() {
            let reordered: Vec<String> = order.iter().map(|&i| col[i].clone()).collect();
            *col = reordered;
        }
        for marks in self.numeric.iter_mut() {
            let reordered: Vec<bool> = order.iter().map(|&i| marks[i]).collect();
            *marks = reordered;
        }
    }

    /// 保留 keep[i] 为 true 的行
    pub fn retain_rows(&mut self, keep: &[bool]) {
        for col in self.data.iter_mut() {
            let mut idx = 0;
            col.retain(|_| {
                let k = keep.get(idx).copied().unwrap_or(false);
                idx += 1;
                k
            });
        }
        for marks in self.numeric.iter_mut() {
            let mut idx = 0;
            marks.retain(|_| {
                let k = keep.get(idx).copied().unwrap_or(false);
                idx += 1;
                k
            });
        }
        self.rows = keep.iter().filter(|k| **k).count().min(self.rows);
    }

    /// 按某列去重，保留首次出现
    pub fn dedup_by(&mut self, name: &str) {
        let Some(col) = self.column(name) else {
            return;
        };
        let mut seen = HashSet::new();
        let keep: Vec<bool> = col.iter().map(|v| seen.insert(v.clone())).collect();
        self.retain_rows(&keep);
    }

    pub fn row(&self, idx: usize) -> Vec<&str> {
        self.data.iter().map(|col| col[idx].as_str()).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        (0..self.rows).map(move |i| self.row(i))
    }

    /// 行 → {列名: 值}
    pub fn row_map(&self, idx: usize) -> HashMap<&str, &str> {
        self.columns
            .iter()
            .zip(self.data.iter())
            .map(|(name, col)| (name.as_str(), col[idx].as_str()))
            .collect()
    }
}
