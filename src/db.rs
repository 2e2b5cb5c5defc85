use crate::config::DB_FILE_NAME;
use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    tracing::info!(path = %db_path.display(), "opened workspace database");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            group_name TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_group ON users(group_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS institutions(
            id TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            access_code TEXT UNIQUE NOT NULL,
            passing_grade REAL NOT NULL DEFAULT 6.0,
            evaluation_system TEXT NOT NULL DEFAULT 'annual',
            created_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_subjects(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            weight_assignments INTEGER NOT NULL DEFAULT 40,
            weight_exams INTEGER NOT NULL DEFAULT 60,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_subjects_class ON course_subjects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            last_read_announcement_seq INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(student_id, class_id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class ON enrollments(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_collaborators(
            teacher_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, class_id),
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS join_requests(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            role TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_join_requests_class ON join_requests(class_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grading_categories(
            id TEXT PRIMARY KEY,
            course_subject_id TEXT NOT NULL,
            name TEXT NOT NULL,
            weight INTEGER NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(course_subject_id) REFERENCES course_subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grading_categories_cs ON grading_categories(course_subject_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            course_subject_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            deadline TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'assignment',
            category_id TEXT,
            period INTEGER NOT NULL DEFAULT 1,
            submission_type TEXT NOT NULL DEFAULT 'digital',
            FOREIGN KEY(course_subject_id) REFERENCES course_subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_cs ON assignments(course_subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            file_name TEXT,
            file_data BLOB,
            submission_link TEXT,
            submitted_at TEXT,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_assignment ON submissions(assignment_id, student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            grade REAL,
            feedback TEXT,
            submission_id TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            UNIQUE(student_id, assignment_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_assignment ON grades(assignment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            class_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_announcements_class ON announcements(class_id, seq)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS materials(
            id TEXT PRIMARY KEY,
            course_subject_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            file_name TEXT,
            file_data BLOB,
            link TEXT,
            created_at TEXT,
            FOREIGN KEY(course_subject_id) REFERENCES course_subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_tariffs(
            group_name TEXT PRIMARY KEY,
            monthly_fee REAL NOT NULL DEFAULT 0.0,
            billing_currency TEXT NOT NULL DEFAULT 'USD',
            notes TEXT
        )",
        [],
    )?;

    run_migrations(&conn)?;

    Ok(conn)
}

/// Additive column migrations for workspaces created by older builds.
pub fn run_migrations(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut applied = Vec::new();
    let columns: &[(&str, &str, &str)] = &[
        ("users", "is_active", "INTEGER NOT NULL DEFAULT 1"),
        ("users", "created_at", "TEXT"),
        ("classes", "passing_grade", "REAL NOT NULL DEFAULT 6.0"),
        (
            "classes",
            "evaluation_system",
            "TEXT NOT NULL DEFAULT 'annual'",
        ),
        (
            "course_subjects",
            "weight_assignments",
            "INTEGER NOT NULL DEFAULT 40",
        ),
        ("course_subjects", "weight_exams", "INTEGER NOT NULL DEFAULT 60"),
        ("grading_categories", "sort_order", "INTEGER NOT NULL DEFAULT 0"),
        ("assignments", "period", "INTEGER NOT NULL DEFAULT 1"),
        (
            "assignments",
            "submission_type",
            "TEXT NOT NULL DEFAULT 'digital'",
        ),
        ("submissions", "submission_link", "TEXT"),
    ];
    for (table, column, decl) in columns {
        if ensure_column(conn, table, column, decl)? {
            applied.push(format!("{}.{}", table, column));
        }
    }
    if !applied.is_empty() {
        tracing::info!(?applied, "applied column migrations");
    }
    Ok(applied)
}

fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> anyhow::Result<bool> {
    if table_has_column(conn, table, column)? {
        return Ok(false);
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
        [],
    )?;
    Ok(true)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
