//! Employee record store adapter.
//!
//! Backed by a `SQLite` database with two tables, `employees` and
//! `leave_balance`. Queries run on the blocking thread pool so a slow disk
//! never stalls the async runtime; the connection sits behind a mutex with
//! poison recovery.

use super::{Adapter, fault, parse_operation};
use crate::models::{Employee, LeaveBalance, ParamSpec, ParamType, ToolDescriptor, ToolResult};
use crate::{Error, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Adapter name used as the owner of every record-store tool.
const ADAPTER_NAME: &str = "records";

/// Upper bound on rows returned by any list or search operation.
const MAX_ROWS: usize = 50;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS employees (
    emp_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    department TEXT NOT NULL,
    position TEXT NOT NULL,
    join_date TEXT NOT NULL,
    manager TEXT,
    email TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS leave_balance (
    emp_id TEXT PRIMARY KEY,
    casual_leave INTEGER DEFAULT 0,
    earned_leave INTEGER DEFAULT 0,
    sick_leave INTEGER DEFAULT 0,
    last_updated TEXT NOT NULL,
    FOREIGN KEY (emp_id) REFERENCES employees(emp_id)
);
CREATE INDEX IF NOT EXISTS idx_employees_department ON employees(department);
";

const EMPLOYEE_COLUMNS: &str = "emp_id, name, department, position, join_date, manager, email";

/// Typed record-store operations.
#[derive(Debug, Deserialize)]
#[serde(tag = "operation", content = "arguments", rename_all = "snake_case")]
enum RecordOp {
    GetEmployee { employee_id: String },
    SearchEmployees { name: String },
    GetEmployeesByDepartment { department: String },
    GetAllEmployees {},
    GetLeaveBalance { employee_id: String },
}

/// Record-store adapter over a `SQLite` employee database.
pub struct RecordStoreAdapter {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStoreAdapter {
    /// Adapter name used as descriptor owner.
    pub const NAME: &'static str = ADAPTER_NAME;

    /// Opens (or creates) the database at `path` and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                    operation: "create_records_dir".to_string(),
                    cause: e.to_string(),
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| Error::OperationFailed {
            operation: "open_records_db".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_connection(conn)
    }

    /// Creates an in-memory store (tests and demos).
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_records_db".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // journal_mode returns a row, so pragma results are ignored
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::OperationFailed {
                operation: "create_records_schema".to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Inserts the sample organisation used by the demo and the tests.
    ///
    /// Existing rows with the same ids are replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if an insert fails.
    pub fn seed_sample_data(&self) -> Result<()> {
        const EMPLOYEES: &[(&str, &str, &str, &str, &str, Option<&str>, &str)] = &[
            ("EMP001", "Rajesh Kumar", "Engineering", "Senior Developer", "2020-03-15", Some("EMP010"), "rajesh.kumar@company.com"),
            ("EMP002", "Priya Sharma", "HR", "HR Manager", "2019-01-10", Some("EMP010"), "priya.sharma@company.com"),
            ("EMP003", "Amit Patel", "Engineering", "DevOps Engineer", "2021-06-20", Some("EMP010"), "amit.patel@company.com"),
            ("EMP004", "Sneha Reddy", "Marketing", "Marketing Executive", "2022-02-14", Some("EMP009"), "sneha.reddy@company.com"),
            ("EMP005", "Vikram Singh", "Sales", "Sales Manager", "2018-11-05", Some("EMP010"), "vikram.singh@company.com"),
            ("EMP006", "Ananya Iyer", "Engineering", "Junior Developer", "2023-01-10", Some("EMP001"), "ananya.iyer@company.com"),
            ("EMP007", "Rahul Gupta", "Finance", "Accountant", "2020-08-22", Some("EMP008"), "rahul.gupta@company.com"),
            ("EMP008", "Meera Nair", "Finance", "Finance Manager", "2017-05-15", Some("EMP010"), "meera.nair@company.com"),
            ("EMP009", "Karthik Rao", "Marketing", "Marketing Head", "2019-07-30", Some("EMP010"), "karthik.rao@company.com"),
            ("EMP010", "Sunita Desai", "Executive", "CEO", "2015-01-01", None, "sunita.desai@company.com"),
            ("E-1042", "John Mathew", "Legal", "Compliance Officer", "2021-09-01", Some("EMP010"), "john.mathew@company.com"),
        ];
        const BALANCES: &[(&str, i64, i64, i64)] = &[
            ("EMP001", 8, 12, 5),
            ("EMP002", 10, 15, 6),
            ("EMP003", 6, 9, 4),
            ("EMP004", 4, 8, 3),
            ("EMP005", 12, 18, 7),
            ("EMP006", 3, 5, 2),
            ("EMP007", 7, 11, 5),
            ("EMP008", 9, 16, 6),
            ("EMP009", 5, 14, 7),
            ("EMP010", 11, 17, 7),
            ("E-1042", 6, 10, 4),
        ];

        let mut conn = acquire(&self.conn);
        let tx = conn.transaction().map_err(seed_error)?;
        for (id, name, dept, position, joined, manager, email) in EMPLOYEES {
            tx.execute(
                "INSERT OR REPLACE INTO employees (emp_id, name, department, position, join_date, manager, email)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, name, dept, position, joined, manager, email],
            )
            .map_err(seed_error)?;
        }
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        for (id, casual, earned, sick) in BALANCES {
            tx.execute(
                "INSERT OR REPLACE INTO leave_balance (emp_id, casual_leave, earned_leave, sick_leave, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, casual, earned, sick, today],
            )
            .map_err(seed_error)?;
        }
        tx.commit().map_err(seed_error)?;
        tracing::info!(employees = EMPLOYEES.len(), "Seeded sample employee records");
        Ok(())
    }

    /// Number of employee rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the count query fails.
    pub fn employee_count(&self) -> Result<u64> {
        let conn = acquire(&self.conn);
        conn.query_row("SELECT COUNT(*) FROM employees", [], |row| row.get::<_, i64>(0))
            .map(|n| u64::try_from(n).unwrap_or(0))
            .map_err(|e| Error::OperationFailed {
                operation: "count_employees".to_string(),
                cause: e.to_string(),
            })
    }

    fn run(conn: &Connection, op: RecordOp) -> rusqlite::Result<ToolResult> {
        match op {
            RecordOp::GetEmployee { employee_id } => {
                let employee = conn
                    .query_row(
                        &format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE emp_id = ?1 COLLATE NOCASE"),
                        params![employee_id.trim()],
                        employee_from_row,
                    )
                    .optional()?;
                Ok(employee.map_or_else(
                    || ToolResult::success(json!({ "found": false, "employee_id": employee_id })),
                    |e| ToolResult::success(json!({ "found": true, "employee": e })),
                ))
            },
            RecordOp::SearchEmployees { name } => {
                let pattern = format!("%{}%", escape_like(name.trim()));
                let rows = query_employees(
                    conn,
                    &format!(
                        "SELECT {EMPLOYEE_COLUMNS} FROM employees
                         WHERE name LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\'
                         ORDER BY name LIMIT ?2"
                    ),
                    params![pattern, limit()],
                )?;
                Ok(employee_list(rows))
            },
            RecordOp::GetEmployeesByDepartment { department } => {
                let rows = query_employees(
                    conn,
                    &format!(
                        "SELECT {EMPLOYEE_COLUMNS} FROM employees
                         WHERE department = ?1 COLLATE NOCASE ORDER BY emp_id LIMIT ?2"
                    ),
                    params![department.trim(), limit()],
                )?;
                Ok(employee_list(rows))
            },
            RecordOp::GetAllEmployees {} => {
                let rows = query_employees(
                    conn,
                    &format!("SELECT {EMPLOYEE_COLUMNS} FROM employees ORDER BY emp_id LIMIT ?1"),
                    params![limit()],
                )?;
                Ok(employee_list(rows))
            },
            RecordOp::GetLeaveBalance { employee_id } => {
                let balance = conn
                    .query_row(
                        "SELECT emp_id, casual_leave, earned_leave, sick_leave, last_updated
                         FROM leave_balance WHERE emp_id = ?1 COLLATE NOCASE",
                        params![employee_id.trim()],
                        |row| {
                            Ok(LeaveBalance {
                                employee_id: row.get(0)?,
                                casual_leave: row.get(1)?,
                                earned_leave: row.get(2)?,
                                sick_leave: row.get(3)?,
                                last_updated: row.get(4)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(balance.map_or_else(
                    || ToolResult::success(json!({ "found": false, "employee_id": employee_id })),
                    |b| ToolResult::success(json!({ "found": true, "leave_balance": b })),
                ))
            },
        }
    }
}

#[async_trait]
impl Adapter for RecordStoreAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "get_employee",
                "Get detailed information about an employee by ID (e.g. 'EMP001')",
                ADAPTER_NAME,
            )
            .with_param(ParamSpec::required(
                "employee_id",
                ParamType::String,
                "The employee ID",
            )),
            ToolDescriptor::new(
                "search_employees",
                "Search for employees by name (partial match)",
                ADAPTER_NAME,
            )
            .with_param(ParamSpec::required(
                "name",
                ParamType::String,
                "Name or partial name to search for",
            )),
            ToolDescriptor::new(
                "get_employees_by_department",
                "Get all employees in a specific department",
                ADAPTER_NAME,
            )
            .with_param(ParamSpec::required(
                "department",
                ParamType::String,
                "Department name (e.g., 'Engineering', 'HR', 'Sales')",
            )),
            ToolDescriptor::new(
                "get_all_employees",
                "Get a list of all employees in the database",
                ADAPTER_NAME,
            ),
            ToolDescriptor::new(
                "get_leave_balance",
                "Get the remaining casual, earned and sick leave days for an employee",
                ADAPTER_NAME,
            )
            .with_param(ParamSpec::required(
                "employee_id",
                ParamType::String,
                "The employee ID",
            )),
        ]
    }

    async fn invoke(&self, operation: &str, arguments: Map<String, Value>) -> ToolResult {
        let op: RecordOp = match parse_operation(operation, arguments) {
            Ok(op) => op,
            Err(failure) => return failure,
        };
        let conn = Arc::clone(&self.conn);
        let name = operation.to_string();

        match tokio::task::spawn_blocking(move || {
            let guard = acquire(&conn);
            Self::run(&guard, op)
        })
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => fault(&name, e),
            Err(join_err) => fault(&name, join_err),
        }
    }
}

fn acquire(mutex: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Record store mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn seed_error(e: rusqlite::Error) -> Error {
    Error::OperationFailed {
        operation: "seed_records".to_string(),
        cause: e.to_string(),
    }
}

fn limit() -> i64 {
    i64::try_from(MAX_ROWS).unwrap_or(i64::MAX)
}

fn employee_from_row(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        employee_id: row.get(0)?,
        name: row.get(1)?,
        department: row.get(2)?,
        position: row.get(3)?,
        join_date: row.get(4)?,
        manager: row.get(5)?,
        email: row.get(6)?,
    })
}

fn query_employees(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<Employee>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, employee_from_row)?;
    rows.collect()
}

fn employee_list(rows: Vec<Employee>) -> ToolResult {
    ToolResult::success(json!({
        "count": rows.len(),
        "truncated": rows.len() >= MAX_ROWS,
        "employees": rows,
    }))
}

/// Escapes `%`, `_` and the escape character itself for a `LIKE` pattern.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureKind;

    fn seeded() -> RecordStoreAdapter {
        let adapter = RecordStoreAdapter::in_memory().unwrap();
        adapter.seed_sample_data().unwrap();
        adapter
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn payload(result: ToolResult) -> Value {
        match result {
            ToolResult::Success { payload } => payload,
            ToolResult::Failure { kind, message } => panic!("{kind}: {message}"),
        }
    }

    #[test]
    fn test_seed_is_idempotent() {
        let adapter = RecordStoreAdapter::in_memory().unwrap();
        assert_eq!(adapter.employee_count().unwrap(), 0);
        adapter.seed_sample_data().unwrap();
        adapter.seed_sample_data().unwrap();
        assert_eq!(adapter.employee_count().unwrap(), 11);
    }

    #[tokio::test]
    async fn test_get_employee_by_id() {
        let adapter = seeded();
        let result = adapter
            .invoke("get_employee", args(json!({"employee_id": "E-1042"})))
            .await;
        let payload = payload(result);
        assert_eq!(payload["found"], true);
        assert_eq!(payload["employee"]["department"], "Legal");
    }

    #[tokio::test]
    async fn test_get_employee_missing_is_not_a_fault() {
        let adapter = seeded();
        let payload = payload(
            adapter
                .invoke("get_employee", args(json!({"employee_id": "EMP999"})))
                .await,
        );
        assert_eq!(payload["found"], false);
    }

    #[tokio::test]
    async fn test_department_lookup_is_case_insensitive() {
        let adapter = seeded();
        let payload = payload(
            adapter
                .invoke(
                    "get_employees_by_department",
                    args(json!({"department": "engineering"})),
                )
                .await,
        );
        assert_eq!(payload["count"], 3);
    }

    #[tokio::test]
    async fn test_search_escapes_wildcards() {
        let adapter = seeded();
        let payload = payload(
            adapter
                .invoke("search_employees", args(json!({"name": "%"})))
                .await,
        );
        assert_eq!(payload["count"], 0);

        let payload = self::payload(
            adapter
                .invoke("search_employees", args(json!({"name": "sharma"})))
                .await,
        );
        assert_eq!(payload["count"], 1);
    }

    #[tokio::test]
    async fn test_leave_balance() {
        let adapter = seeded();
        let payload = payload(
            adapter
                .invoke("get_leave_balance", args(json!({"employee_id": "EMP005"})))
                .await,
        );
        assert_eq!(payload["leave_balance"]["earned_leave"], 18);
    }

    #[tokio::test]
    async fn test_unknown_operation_rejected() {
        let adapter = seeded();
        let result = adapter.invoke("drop_employees", Map::new()).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidArguments));
    }

    #[test]
    fn test_descriptors_owned_by_adapter() {
        let adapter = RecordStoreAdapter::in_memory().unwrap();
        let descriptors = adapter.descriptors();
        assert_eq!(descriptors.len(), 5);
        assert!(descriptors.iter().all(|d| d.adapter == "records"));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("employees.db");
        let adapter = RecordStoreAdapter::open(&path).unwrap();
        adapter.seed_sample_data().unwrap();
        assert!(path.exists());
    }
}
