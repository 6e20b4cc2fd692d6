//! Static table/column catalog for both schema generations.
//!
//! # Responsibility
//! - Describe every table, column, key and foreign key LogIT persists.
//! - Record the schema version each table/column first appeared in, so DDL can
//!   be rendered for any supported version.
//! - Validate table/column names before they reach SQL text.
//!
//! # Invariants
//! - Current-generation tables are listed parents-first.
//! - Columns added after a table's creation carry a non-`PRIMARY KEY`,
//!   constant-default definition (SQLite `ADD COLUMN` restrictions).

use crate::db::{DbError, DbResult, SchemaGeneration};

/// One column and the SQL fragment that follows its name in DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub definition: &'static str,
    /// Schema version the column first appeared in. `0` means "with the table".
    pub added_in: u32,
}

/// Table-level foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub parent_table: &'static str,
    pub parent_column: &'static str,
    pub on_delete: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub primary_key: &'static str,
    /// Whether `primary_key` is an auto-incremented integer rowid alias.
    pub integer_key: bool,
    pub added_in: u32,
    pub columns: &'static [ColumnDef],
    pub foreign_keys: &'static [ForeignKey],
    /// Columns that get a plain secondary index.
    pub indexes: &'static [&'static str],
}

const fn col(name: &'static str, definition: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        definition,
        added_in: 0,
    }
}

const fn col_since(name: &'static str, definition: &'static str, added_in: u32) -> ColumnDef {
    ColumnDef {
        name,
        definition,
        added_in,
    }
}

const fn cascade(
    column: &'static str,
    parent_table: &'static str,
    parent_column: &'static str,
) -> ForeignKey {
    ForeignKey {
        column,
        parent_table,
        parent_column,
        on_delete: "CASCADE",
    }
}

impl TableDef {
    /// Looks up a column by name (SQLite identifiers are case-insensitive).
    pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Columns present at `version`.
    pub fn columns_at(&self, version: u32) -> impl Iterator<Item = &'static ColumnDef> {
        self.columns
            .iter()
            .filter(move |column| column.added_in <= version)
    }

    pub fn exists_at(&self, version: u32) -> bool {
        self.added_in <= version
    }

    /// Renders `CREATE TABLE IF NOT EXISTS` for the table shape at `version`.
    pub fn create_sql(&self, version: u32) -> String {
        let mut parts: Vec<String> = self
            .columns_at(version)
            .map(|column| format!("\"{}\" {}", column.name, column.definition))
            .collect();

        for fk in self.foreign_keys {
            if self.columns_at(version).any(|column| column.name == fk.column) {
                parts.push(format!(
                    "FOREIGN KEY (\"{}\") REFERENCES \"{}\"(\"{}\") ON DELETE {}",
                    fk.column, fk.parent_table, fk.parent_column, fk.on_delete
                ));
            }
        }

        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n);",
            self.name,
            parts.join(",\n    ")
        )
    }

    /// Renders `CREATE INDEX IF NOT EXISTS` statements for indexed columns.
    pub fn index_sql(&self, version: u32) -> Vec<String> {
        self.indexes
            .iter()
            .filter(|name| {
                self.column(name)
                    .is_some_and(|column| column.added_in <= version)
            })
            .map(|name| {
                format!(
                    "CREATE INDEX IF NOT EXISTS \"idx_{table}_{name}\" ON \"{table}\"(\"{name}\");",
                    table = self.name
                )
            })
            .collect()
    }
}

/// Current (normalized) generation, versions 20 and later.
pub mod current {
    use super::{cascade, col, ForeignKey, TableDef};

    pub const DAT: TableDef = TableDef {
        name: "Dat",
        primary_key: "name",
        integer_key: false,
        added_in: 20,
        columns: &[
            col("name", "TEXT PRIMARY KEY NOT NULL"),
            col("amendments", "TEXT NOT NULL DEFAULT ''"),
            col("comments", "TEXT NOT NULL DEFAULT ''"),
            col("timestamp", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[],
        indexes: &[],
    };

    pub const RUN: TableDef = TableDef {
        name: "Run",
        primary_key: "id",
        integer_key: true,
        added_in: 20,
        columns: &[
            col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("timestamp", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
            col("run_hash", "TEXT NOT NULL UNIQUE"),
            col("setup", "TEXT NOT NULL DEFAULT ''"),
            col("comments", "TEXT NOT NULL DEFAULT ''"),
            col("ief", "TEXT NOT NULL DEFAULT ''"),
            col("tcf", "TEXT NOT NULL DEFAULT ''"),
            col("initial_conditions", "TEXT NOT NULL DEFAULT ''"),
            col("isis_results", "TEXT NOT NULL DEFAULT ''"),
            col("tuflow_results", "TEXT NOT NULL DEFAULT ''"),
            col("estry_results", "TEXT NOT NULL DEFAULT ''"),
            col("event_duration", "REAL NOT NULL DEFAULT 0"),
            col("run_status", "TEXT NOT NULL DEFAULT ''"),
            col("mb", "REAL NOT NULL DEFAULT 0"),
            col("modeller", "TEXT NOT NULL DEFAULT ''"),
            col("isis_version", "TEXT NOT NULL DEFAULT ''"),
            col("tuflow_version", "TEXT NOT NULL DEFAULT ''"),
            col("event_name", "TEXT NOT NULL DEFAULT ''"),
            col("ief_dir", "TEXT NOT NULL DEFAULT ''"),
            col("tcf_dir", "TEXT NOT NULL DEFAULT ''"),
            col("log_dir", "TEXT NOT NULL DEFAULT ''"),
            col("run_options", "TEXT NOT NULL DEFAULT ''"),
            col("dat", "TEXT"),
        ],
        foreign_keys: &[ForeignKey {
            column: "dat",
            parent_table: "Dat",
            parent_column: "name",
            on_delete: "SET NULL",
        }],
        indexes: &["dat"],
    };

    pub const MODEL_FILE: TableDef = TableDef {
        name: "ModelFile",
        primary_key: "name",
        integer_key: false,
        added_in: 20,
        columns: &[
            col("name", "TEXT PRIMARY KEY NOT NULL"),
            col("model_type", "TEXT NOT NULL"),
            col("comments", "TEXT NOT NULL DEFAULT ''"),
            col("timestamp", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[],
        indexes: &["model_type"],
    };

    pub const SUB_FILE: TableDef = TableDef {
        name: "SubFile",
        primary_key: "name",
        integer_key: false,
        added_in: 20,
        columns: &[
            col("name", "TEXT PRIMARY KEY NOT NULL"),
            col("timestamp", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[],
        indexes: &[],
    };

    pub const IED: TableDef = TableDef {
        name: "Ied",
        primary_key: "name",
        integer_key: false,
        added_in: 20,
        columns: &[
            col("name", "TEXT PRIMARY KEY NOT NULL"),
            col("ref", "TEXT NOT NULL DEFAULT ''"),
            col("amendments", "TEXT NOT NULL DEFAULT ''"),
            col("comments", "TEXT NOT NULL DEFAULT ''"),
            col("timestamp", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[],
        indexes: &[],
    };

    pub const RUN_MODEL_FILE: TableDef = TableDef {
        name: "Run_ModelFile",
        primary_key: "id",
        integer_key: true,
        added_in: 20,
        columns: &[
            col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("run_id", "INTEGER NOT NULL"),
            col("model_file_id", "TEXT NOT NULL"),
            col("new_file", "INTEGER NOT NULL DEFAULT 0"),
            col("timestamp", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[
            cascade("run_id", "Run", "id"),
            cascade("model_file_id", "ModelFile", "name"),
        ],
        indexes: &["run_id", "model_file_id"],
    };

    pub const MODEL_FILE_SUB_FILE: TableDef = TableDef {
        name: "ModelFile_SubFile",
        primary_key: "id",
        integer_key: true,
        added_in: 20,
        columns: &[
            col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("model_file_id", "TEXT NOT NULL"),
            col("sub_file_id", "TEXT NOT NULL"),
            col("new_file", "INTEGER NOT NULL DEFAULT 0"),
            col("timestamp", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[
            cascade("model_file_id", "ModelFile", "name"),
            cascade("sub_file_id", "SubFile", "name"),
        ],
        indexes: &["model_file_id", "sub_file_id"],
    };

    pub const RUN_SUB_FILE: TableDef = TableDef {
        name: "Run_SubFile",
        primary_key: "id",
        integer_key: true,
        added_in: 21,
        columns: &[
            col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("run_id", "INTEGER NOT NULL"),
            col("sub_file_id", "TEXT NOT NULL"),
            col("new_file", "INTEGER NOT NULL DEFAULT 0"),
            col("timestamp", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[
            cascade("run_id", "Run", "id"),
            cascade("sub_file_id", "SubFile", "name"),
        ],
        indexes: &["run_id", "sub_file_id"],
    };

    pub const RUN_IED: TableDef = TableDef {
        name: "Run_Ied",
        primary_key: "id",
        integer_key: true,
        added_in: 20,
        columns: &[
            col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("run_id", "INTEGER NOT NULL"),
            col("ied_id", "TEXT NOT NULL"),
            col("new_file", "INTEGER NOT NULL DEFAULT 0"),
            col("timestamp", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[cascade("run_id", "Run", "id"), cascade("ied_id", "Ied", "name")],
        indexes: &["run_id", "ied_id"],
    };

    pub const TABLES: &[TableDef] = &[
        DAT,
        RUN,
        MODEL_FILE,
        SUB_FILE,
        IED,
        RUN_MODEL_FILE,
        MODEL_FILE_SUB_FILE,
        RUN_SUB_FILE,
        RUN_IED,
    ];
}

/// Legacy (raw-SQL) generation, versions 17 to 19.
pub mod legacy {
    use super::{col, col_since, TableDef};

    /// Model-file tables in the order their names appear in `RUN` columns.
    pub const MODEL_TYPES: &[&str] = &["TCF", "ECF", "TGC", "TBC", "BC_DBASE"];

    pub const RUN: TableDef = TableDef {
        name: "RUN",
        primary_key: "ID",
        integer_key: true,
        added_in: 0,
        columns: &[
            col("ID", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("DATE", "TEXT"),
            col("MODELLER", "TEXT"),
            col("SETUP", "TEXT"),
            col("COMMENTS", "TEXT"),
            col("IEF", "TEXT"),
            col("TCF", "TEXT"),
            col("TGC", "TEXT"),
            col("TBC", "TEXT"),
            col("DAT", "TEXT"),
            col("ECF", "TEXT"),
            col("BC_DBASE", "TEXT"),
            col("INITIAL_CONDITIONS", "TEXT"),
            col("ISIS_RESULTS", "TEXT"),
            col("TUFLOW_RESULTS", "TEXT"),
            col("ESTRY_RESULTS", "TEXT"),
            col("EVENT_DURATION", "TEXT"),
            col("RUN_STATUS", "TEXT"),
            col("MB", "TEXT"),
            col("ISIS_BUILD", "TEXT"),
            col("TUFLOW_BUILD", "TEXT"),
            col("IEF_DIR", "TEXT"),
            col("TCF_DIR", "TEXT"),
            col("LOG_DIR", "TEXT"),
            col_since("EVENT_NAME", "TEXT DEFAULT 'None'", 18),
            col_since("RUN_OPTIONS", "TEXT DEFAULT 'None'", 18),
        ],
        foreign_keys: &[],
        indexes: &[],
    };

    pub const DAT: TableDef = TableDef {
        name: "DAT",
        primary_key: "ID",
        integer_key: true,
        added_in: 0,
        columns: &[
            col("ID", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            col("DATE", "TEXT"),
            col("DAT", "TEXT"),
            col("AMENDMENTS", "TEXT"),
            col("COMMENTS", "TEXT"),
        ],
        foreign_keys: &[],
        indexes: &[],
    };

    macro_rules! model_tables {
        ($main:ident, $side:ident, $name:literal, $since:expr) => {
            pub const $main: TableDef = TableDef {
                name: $name,
                primary_key: "ID",
                integer_key: true,
                added_in: $since,
                columns: &[
                    col("ID", "INTEGER PRIMARY KEY AUTOINCREMENT"),
                    col("DATE", "TEXT"),
                    col($name, "TEXT"),
                    col("FILES", "TEXT"),
                    col("NEW_FILES", "TEXT"),
                    col("COMMENTS", "TEXT"),
                ],
                foreign_keys: &[],
                indexes: &[],
            };

            pub const $side: TableDef = TableDef {
                name: concat!($name, "_FILES"),
                primary_key: "ID",
                integer_key: true,
                added_in: $since,
                columns: &[
                    col("ID", "INTEGER PRIMARY KEY AUTOINCREMENT"),
                    col("DATE", "TEXT"),
                    col($name, "TEXT"),
                    col("FILES", "TEXT"),
                ],
                foreign_keys: &[],
                indexes: &[],
            };
        };
    }

    model_tables!(TCF, TCF_FILES, "TCF", 0);
    model_tables!(ECF, ECF_FILES, "ECF", 0);
    model_tables!(TGC, TGC_FILES, "TGC", 0);
    model_tables!(TBC, TBC_FILES, "TBC", 0);
    model_tables!(BC_DBASE, BC_DBASE_FILES, "BC_DBASE", 19);

    pub const TABLES: &[TableDef] = &[
        RUN,
        DAT,
        TCF,
        TCF_FILES,
        ECF,
        ECF_FILES,
        TGC,
        TGC_FILES,
        TBC,
        TBC_FILES,
        BC_DBASE,
        BC_DBASE_FILES,
    ];
}

/// Catalog of one schema generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaCatalog {
    generation: SchemaGeneration,
    tables: &'static [TableDef],
}

impl SchemaCatalog {
    pub fn for_generation(generation: SchemaGeneration) -> Self {
        let tables = match generation {
            SchemaGeneration::Legacy => legacy::TABLES,
            SchemaGeneration::Current => current::TABLES,
        };
        Self { generation, tables }
    }

    pub fn for_version(version: u32) -> Self {
        Self::for_generation(SchemaGeneration::for_version(version))
    }

    pub fn generation(&self) -> SchemaGeneration {
        self.generation
    }

    pub fn tables(&self) -> &'static [TableDef] {
        self.tables
    }

    /// Resolves a table name, failing with `SchemaMismatch` when unknown.
    pub fn table(&self, name: &str) -> DbResult<&'static TableDef> {
        self.tables
            .iter()
            .find(|table| table.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| DbError::schema_mismatch(self.generation, name, None))
    }

    /// Resolves a column of a table, failing with `SchemaMismatch` when unknown.
    pub fn column(&self, table: &str, column: &str) -> DbResult<&'static ColumnDef> {
        let table_def = self.table(table)?;
        table_def
            .column(column)
            .ok_or_else(|| DbError::schema_mismatch(self.generation, table_def.name, Some(column)))
    }

    /// DDL creating every table (and index) that exists at `version`.
    pub fn create_sql(&self, version: u32) -> Vec<String> {
        let mut statements = Vec::new();
        for table in self.tables.iter().filter(|table| table.exists_at(version)) {
            statements.push(table.create_sql(version));
            statements.extend(table.index_sql(version));
        }
        statements
    }
}
