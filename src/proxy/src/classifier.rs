//! Textual SQL classification for `COM_QUERY` payloads.
//!
//! The classifier never validates grammar; it only answers the questions the
//! rest of the proxy needs answered to route and track a statement safely:
//! does it open/close a transaction, does it write, does it touch a system
//! or user variable, what tables/databases does it reference. Unknown or
//! unparseable input always classifies conservatively (as a write), never
//! silently as a read.

use bitflags::bitflags;
use winnow::ascii::multispace0;
use winnow::combinator::alt;
use winnow::prelude::*;
use winnow::token::take_while;

bitflags! {
    /// Mirrors MariaDB's `QUERY_TYPE_*` bitmask family: a statement can set
    /// more than one bit (e.g. `CREATE TEMPORARY TABLE` is both `WRITE` and
    /// `CREATE_TMP_TABLE`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeMask: u32 {
        const READ                 = 1 << 0;
        const WRITE                = 1 << 1;
        const SESSION_WRITE        = 1 << 2;
        const BEGIN_TRX            = 1 << 3;
        const COMMIT               = 1 << 4;
        const ROLLBACK              = 1 << 5;
        const READONLY             = 1 << 6;
        const READWRITE            = 1 << 7;
        const SHOW_DATABASES       = 1 << 8;
        const SHOW_TABLES          = 1 << 9;
        const USERVAR_READ         = 1 << 10;
        const USERVAR_WRITE        = 1 << 11;
        const SYSVAR_READ          = 1 << 12;
        const SYSVAR_WRITE         = 1 << 13;
        const GSYSVAR_READ         = 1 << 14;
        const GSYSVAR_WRITE        = 1 << 15;
        const ENABLE_AUTOCOMMIT    = 1 << 16;
        const DISABLE_AUTOCOMMIT   = 1 << 17;
        const CREATE_TMP_TABLE     = 1 << 18;
        const NEXT_TRX             = 1 << 19;
        const PREPARE_NAMED_STMT   = 1 << 20;
        const EXEC_STMT            = 1 << 21;
        const DEALLOC_PREPARE      = 1 << 22;
        /// A read that never needs to reach a backend at all (e.g. `SELECT 1`,
        /// `SELECT NOW()` with no table reference).
        const LOCAL_READ           = 1 << 23;
        /// A read that must be routed to the master/write backend regardless
        /// of the read/write split (`SELECT ... FOR UPDATE`, `LAST_INSERT_ID()`).
        const MASTER_READ          = 1 << 24;
        /// Wire-level `COM_STMT_PREPARE`, set by the caller alongside the
        /// text-classification bits `classify` returns for the prepared
        /// statement's body (distinct from `PREPARE_NAMED_STMT`'s SQL-level
        /// `PREPARE ... FROM`).
        const PREPARE_STMT         = 1 << 25;
        /// A read against a table this session created with `CREATE TEMPORARY
        /// TABLE` (set by [`classify_with_tmp_tables`]).
        const READ_TMP_TABLE       = 1 << 26;
    }
}

/// Marks wire-level `COM_STMT_PREPARE` for the session history/transaction
/// tracker, independent of the text being prepared (which the caller
/// classifies and ORs in separately — see `server::haentgl_server`).
pub fn wire_prepare_stmt_classification() -> Classification {
    Classification {
        type_mask: TypeMask::PREPARE_STMT,
        ..Default::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operation {
    #[default]
    Undefined,
    Alter,
    Call,
    ChangeDb,
    Create,
    Delete,
    Drop,
    Execute,
    Explain,
    Grant,
    Insert,
    LoadLocal,
    Load,
    Revoke,
    Select,
    Set,
    SetTransaction,
    Show,
    Truncate,
    Update,
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillTarget {
    Connection,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillDescriptor {
    pub target: KillTarget,
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseResult {
    #[default]
    Valid,
    /// The tokenizer could not make sense of the statement at all; the
    /// classification conservatively reports `WRITE` so the caller never
    /// treats an unrecognized statement as session-safe to reorder.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlMode {
    #[default]
    Default,
    Oracle,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifierOptions {
    pub sql_mode: SqlMode,
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub type_mask: TypeMask,
    pub operation: Operation,
    pub tables: Vec<String>,
    pub databases: Vec<String>,
    pub fields: Vec<String>,
    pub functions: Vec<String>,
    pub ps_name: Option<String>,
    pub kill_descriptor: Option<KillDescriptor>,
    pub parse_result: ParseResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    upper: String,
}

impl Token {
    fn new(text: &str) -> Self {
        Token {
            text: text.to_string(),
            upper: text.to_ascii_uppercase(),
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        self.upper == kw
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.' || c == '`'
}

/// Skips whitespace, `-- `/`#` line comments and `/* */` block comments,
/// never stepping inside a quoted string literal.
fn skip_trivia(mut input: &str) -> &str {
    loop {
        let before = input.len();
        input = multispace0::<_, winnow::error::ContextError>
            .parse_peek(input)
            .map(|(rest, _)| rest)
            .unwrap_or(input);
        if let Some(rest) = input.strip_prefix("--") {
            input = match rest.find('\n') {
                Some(idx) => &rest[idx + 1..],
                None => "",
            };
        } else if let Some(rest) = input.strip_prefix('#') {
            input = match rest.find('\n') {
                Some(idx) => &rest[idx + 1..],
                None => "",
            };
        } else if let Some(rest) = input.strip_prefix("/*") {
            input = match rest.find("*/") {
                Some(idx) => &rest[idx + 2..],
                None => "",
            };
        }
        if input.len() == before {
            return input;
        }
    }
}

fn read_quoted(input: &str, quote: char) -> (&str, &str) {
    let bytes = input.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] as char == quote {
            if i + 1 < bytes.len() && bytes[i + 1] as char == quote {
                i += 2;
                continue;
            }
            return (&input[..i + 1], &input[i + 1..]);
        }
        if bytes[i] as char == '\\' && i + 1 < bytes.len() {
            i += 2;
            continue;
        }
        i += 1;
    }
    (input, "")
}

fn tokenize(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut input = skip_trivia(sql);
    while !input.is_empty() {
        let first = input.chars().next().unwrap();
        if first == '\'' || first == '"' {
            let (lexeme, rest) = read_quoted(input, first);
            tokens.push(Token::new(lexeme));
            input = skip_trivia(rest);
            continue;
        }
        if first == '@' {
            let double = input.starts_with("@@");
            let skip = if double { 2 } else { 1 };
            let rest = &input[skip..];
            let (tail, name): (&str, &str) = take_while::<_, _, winnow::error::ContextError>(0.., is_ident_char)
                .parse_peek(rest)
                .unwrap_or((rest, ""));
            let lexeme = &input[..skip + name.len()];
            tokens.push(Token::new(lexeme));
            input = skip_trivia(tail);
            continue;
        }
        if is_ident_char(first) {
            let (tail, word): (&str, &str) = take_while::<_, _, winnow::error::ContextError>(1.., is_ident_char)
                .parse_peek(input)
                .unwrap_or(("", input));
            tokens.push(Token::new(word));
            input = skip_trivia(tail);
            continue;
        }
        // single-char punctuation token: `=`, `;`, `,`, `(`, `)`, `:` (for `:=`)
        if first == ':' && input.len() > 1 && input.as_bytes()[1] as char == '=' {
            tokens.push(Token::new(":="));
            input = skip_trivia(&input[2..]);
            continue;
        }
        let boundary = first.len_utf8();
        tokens.push(Token::new(&input[..boundary]));
        input = skip_trivia(&input[boundary..]);
    }
    tokens
}

fn strip_quotes(raw: &str) -> String {
    let trimmed = raw.trim_matches('`');
    if (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
        || (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
    {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

fn push_qualified(class: &mut Classification, ident: &str) {
    let clean = strip_quotes(ident);
    if let Some((db, table)) = clean.split_once('.') {
        if !db.is_empty() {
            class.databases.push(db.to_string());
        }
        class.tables.push(table.to_string());
    } else {
        class.tables.push(clean);
    }
}

/// Collects comma-separated table references that follow a `FROM`/`INTO`/
/// `UPDATE`/`JOIN`/`TABLE` keyword, stopping at the next recognized keyword.
fn collect_table_refs(tokens: &[Token], mut idx: usize, class: &mut Classification) {
    loop {
        while idx < tokens.len() && tokens[idx].is_kw(",") {
            idx += 1;
        }
        if idx >= tokens.len() {
            return;
        }
        let tok = &tokens[idx];
        if tok.is_kw("(") || is_reserved_stop(tok) {
            return;
        }
        push_qualified(class, &tok.text);
        idx += 1;
        if idx < tokens.len() && tokens[idx].is_kw(",") {
            idx += 1;
            continue;
        }
        return;
    }
}

fn is_reserved_stop(tok: &Token) -> bool {
    matches!(
        tok.upper.as_str(),
        "WHERE"
            | "SET"
            | "VALUES"
            | "ON"
            | "JOIN"
            | "ORDER"
            | "GROUP"
            | "LIMIT"
            | "HAVING"
            | ";"
    )
}

fn collect_var_refs(tokens: &[Token], class: &mut Classification, statement_has_global: bool) {
    for (idx, tok) in tokens.iter().enumerate() {
        if tok.text.starts_with("@@") {
            let is_global = statement_has_global || tok.text[2..].to_ascii_lowercase().starts_with("global.");
            let is_write = tokens.get(idx + 1).map(|n| n.is_kw("=") || n.is_kw(":=")).unwrap_or(false);
            if is_global {
                class.type_mask |= if is_write { TypeMask::GSYSVAR_WRITE } else { TypeMask::GSYSVAR_READ };
            } else {
                class.type_mask |= if is_write { TypeMask::SYSVAR_WRITE } else { TypeMask::SYSVAR_READ };
            }
        } else if tok.text.starts_with('@') {
            let is_write = tokens.get(idx + 1).map(|n| n.is_kw("=") || n.is_kw(":=")).unwrap_or(false);
            class.type_mask |= if is_write { TypeMask::USERVAR_WRITE } else { TypeMask::USERVAR_READ };
        } else if tok.text.contains('(') {
            // handled by caller for function-name extraction
        }
    }
}

fn collect_functions(tokens: &[Token], class: &mut Classification) {
    for (idx, tok) in tokens.iter().enumerate() {
        if tokens.get(idx + 1).map(|n| n.is_kw("(")).unwrap_or(false)
            && tok.upper.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
            && !is_keyword(&tok.upper)
        {
            class.functions.push(tok.text.clone());
        }
    }
}

fn is_keyword(upper: &str) -> bool {
    matches!(
        upper,
        "SELECT" | "FROM" | "WHERE" | "INSERT" | "INTO" | "UPDATE" | "DELETE" | "VALUES"
            | "SET" | "AND" | "OR" | "NOT" | "IN" | "JOIN" | "ON" | "GROUP" | "ORDER" | "BY"
            | "HAVING" | "LIMIT" | "AS"
    )
}

/// Functions whose result depends on state only the master/write backend has
/// an authoritative view of (the last statement's auto-increment id, the row
/// count of the previous command); a `SELECT` referencing one of these must
/// not be routed to a stale read replica even though it is otherwise a read.
const MASTER_READ_FUNCTIONS: &[&str] =
    &["LAST_INSERT_ID", "FOUND_ROWS", "ROW_COUNT"];

fn is_master_read(tokens: &[Token], class: &Classification) -> bool {
    class
        .functions
        .iter()
        .any(|f| MASTER_READ_FUNCTIONS.contains(&f.to_ascii_uppercase().as_str()))
        || tokens.windows(2).any(|w| w[0].is_kw("FOR") && w[1].is_kw("UPDATE"))
        || tokens.windows(3).any(|w| w[0].is_kw("LOCK") && w[1].is_kw("IN") && w[2].is_kw("SHARE"))
}

/// Classifies a single SQL statement's text (the payload of a `COM_QUERY`,
/// without the leading command byte).
pub fn classify(sql: &str, opts: ClassifierOptions) -> Classification {
    classify_with_tmp_tables(sql, opts, &std::collections::HashSet::new())
}

/// As [`classify`], but `READ_TMP_TABLE` is set on a read whose referenced
/// table appears in `known_tmp_tables` — the set of tables this session has
/// itself created with `CREATE TEMPORARY TABLE` (threaded in by the caller,
/// since that is session state the classifier itself never observes).
pub fn classify_with_tmp_tables(
    sql: &str,
    _opts: ClassifierOptions,
    known_tmp_tables: &std::collections::HashSet<String>,
) -> Classification {
    let tokens = tokenize(sql);
    let mut class = Classification::default();
    if tokens.is_empty() {
        class.parse_result = ParseResult::Invalid;
        class.type_mask = TypeMask::WRITE;
        return class;
    }

    let statement_has_global = tokens.iter().any(|t| t.is_kw("GLOBAL"));
    collect_var_refs(&tokens, &mut class, statement_has_global);
    collect_functions(&tokens, &mut class);

    let first = &tokens[0];
    match first.upper.as_str() {
        "BEGIN" => {
            class.type_mask |= TypeMask::BEGIN_TRX;
        }
        "START" if tokens.get(1).map(|t| t.is_kw("TRANSACTION")).unwrap_or(false) => {
            class.type_mask |= TypeMask::BEGIN_TRX;
            if tokens.iter().any(|t| t.is_kw("ONLY")) {
                class.type_mask |= TypeMask::READONLY | TypeMask::READ;
            } else {
                class.type_mask |= TypeMask::READWRITE | TypeMask::WRITE;
            }
        }
        "COMMIT" => {
            class.type_mask |= TypeMask::COMMIT;
        }
        "ROLLBACK" => {
            class.type_mask |= TypeMask::ROLLBACK;
        }
        "SET" => {
            class.operation = Operation::Set;
            classify_set(&tokens, &mut class);
        }
        "SELECT" => {
            class.operation = Operation::Select;
            class.type_mask |= TypeMask::READ;
            collect_select_fields(&tokens, &mut class);
            if let Some(from_idx) = tokens.iter().position(|t| t.is_kw("FROM")) {
                collect_table_refs(&tokens, from_idx + 1, &mut class);
            } else {
                class.type_mask |= TypeMask::LOCAL_READ;
            }
            if is_master_read(&tokens, &class) {
                class.type_mask |= TypeMask::MASTER_READ;
            }
            if class.tables.iter().any(|t| known_tmp_tables.contains(t)) {
                class.type_mask |= TypeMask::READ_TMP_TABLE;
            }
        }
        "INSERT" => {
            class.operation = Operation::Insert;
            class.type_mask |= TypeMask::WRITE;
            if let Some(into_idx) = tokens.iter().position(|t| t.is_kw("INTO")) {
                collect_table_refs(&tokens, into_idx + 1, &mut class);
            }
        }
        "UPDATE" => {
            class.operation = Operation::Update;
            class.type_mask |= TypeMask::WRITE;
            collect_table_refs(&tokens, 1, &mut class);
        }
        "DELETE" => {
            class.operation = Operation::Delete;
            class.type_mask |= TypeMask::WRITE;
            if let Some(from_idx) = tokens.iter().position(|t| t.is_kw("FROM")) {
                collect_table_refs(&tokens, from_idx + 1, &mut class);
            }
        }
        "SHOW" => {
            class.operation = Operation::Show;
            class.type_mask |= TypeMask::READ;
            if tokens.get(1).map(|t| t.is_kw("DATABASES") || t.is_kw("SCHEMAS")).unwrap_or(false) {
                class.type_mask |= TypeMask::SHOW_DATABASES;
            } else if tokens.get(1).map(|t| t.is_kw("TABLES")).unwrap_or(false) {
                class.type_mask |= TypeMask::SHOW_TABLES;
            }
        }
        "CREATE" => {
            class.operation = Operation::Create;
            class.type_mask |= TypeMask::WRITE;
            if tokens.iter().any(|t| t.is_kw("TEMPORARY")) {
                class.type_mask |= TypeMask::CREATE_TMP_TABLE;
            }
            if let Some(table_idx) = tokens.iter().position(|t| t.is_kw("TABLE")) {
                collect_table_refs(&tokens, table_idx + 1, &mut class);
            }
        }
        "ALTER" => {
            class.operation = Operation::Alter;
            class.type_mask |= TypeMask::WRITE;
            if let Some(table_idx) = tokens.iter().position(|t| t.is_kw("TABLE")) {
                collect_table_refs(&tokens, table_idx + 1, &mut class);
            }
        }
        "DROP" => {
            class.operation = Operation::Drop;
            class.type_mask |= TypeMask::WRITE;
            if let Some(table_idx) = tokens.iter().position(|t| t.is_kw("TABLE")) {
                collect_table_refs(&tokens, table_idx + 1, &mut class);
            }
        }
        "TRUNCATE" => {
            class.operation = Operation::Truncate;
            class.type_mask |= TypeMask::WRITE;
            collect_table_refs(&tokens, if tokens.get(1).map(|t| t.is_kw("TABLE")).unwrap_or(false) { 2 } else { 1 }, &mut class);
        }
        "GRANT" => {
            class.operation = Operation::Grant;
            class.type_mask |= TypeMask::WRITE;
        }
        "REVOKE" => {
            class.operation = Operation::Revoke;
            class.type_mask |= TypeMask::WRITE;
        }
        "CALL" => {
            class.operation = Operation::Call;
            class.type_mask |= TypeMask::WRITE;
        }
        "EXPLAIN" | "DESCRIBE" | "DESC" => {
            class.operation = Operation::Explain;
            class.type_mask |= TypeMask::READ;
        }
        "USE" => {
            class.operation = Operation::ChangeDb;
            class.type_mask |= TypeMask::SESSION_WRITE;
            if let Some(db) = tokens.get(1) {
                class.databases.push(strip_quotes(&db.text));
            }
        }
        "KILL" => {
            class.operation = Operation::Kill;
            classify_kill(&tokens, &mut class);
        }
        "PREPARE" => {
            class.type_mask |= TypeMask::PREPARE_NAMED_STMT;
            class.ps_name = tokens.get(1).map(|t| t.text.clone());
        }
        "EXECUTE" => {
            class.operation = Operation::Execute;
            class.type_mask |= TypeMask::EXEC_STMT;
            class.ps_name = tokens.get(1).map(|t| t.text.clone());
        }
        "DEALLOCATE" => {
            class.type_mask |= TypeMask::DEALLOC_PREPARE;
            let name_idx = if tokens.get(1).map(|t| t.is_kw("PREPARE")).unwrap_or(false) { 2 } else { 1 };
            class.ps_name = tokens.get(name_idx).map(|t| t.text.clone());
        }
        "LOAD" => {
            let is_local = tokens.iter().any(|t| t.is_kw("LOCAL"));
            class.operation = if is_local { Operation::LoadLocal } else { Operation::Load };
            class.type_mask |= if is_local { TypeMask::WRITE } else { TypeMask::WRITE };
        }
        _ => {
            class.parse_result = ParseResult::Invalid;
            class.type_mask |= TypeMask::WRITE;
        }
    }
    class
}

pub fn classify_default(sql: &str) -> Classification {
    classify(sql, ClassifierOptions::default())
}

fn classify_set(tokens: &[Token], class: &mut Classification) {
    let mut idx = 1;
    let is_global = tokens.get(idx).map(|t| t.is_kw("GLOBAL")).unwrap_or(false);
    if is_global || tokens.get(idx).map(|t| t.is_kw("SESSION")).unwrap_or(false) {
        idx += 1;
    }
    if tokens.get(idx).map(|t| t.is_kw("TRANSACTION")).unwrap_or(false) {
        class.operation = Operation::SetTransaction;
        class.type_mask |= TypeMask::NEXT_TRX;
        return;
    }
    if tokens.get(idx).map(|t| t.is_kw("AUTOCOMMIT")).unwrap_or(false) {
        let value = tokens.get(idx + 2).map(|t| t.upper.as_str()).unwrap_or("");
        let enabling = matches!(value, "1" | "TRUE" | "ON");
        if is_global {
            // global autocommit has no effect on the current session's
            // transaction state, and nothing session-local needs replaying.
            return;
        }
        if enabling {
            class.type_mask |= TypeMask::COMMIT | TypeMask::ENABLE_AUTOCOMMIT | TypeMask::SESSION_WRITE;
        } else {
            class.type_mask |=
                TypeMask::BEGIN_TRX | TypeMask::DISABLE_AUTOCOMMIT | TypeMask::SESSION_WRITE;
        }
        return;
    }
    class.type_mask |= TypeMask::SESSION_WRITE;
}

fn classify_kill(tokens: &[Token], class: &mut Classification) {
    let mut idx = 1;
    let target = if tokens.get(idx).map(|t| t.is_kw("QUERY")).unwrap_or(false) {
        idx += 1;
        KillTarget::Query
    } else if tokens.get(idx).map(|t| t.is_kw("CONNECTION")).unwrap_or(false) {
        idx += 1;
        KillTarget::Connection
    } else {
        KillTarget::Connection
    };
    if let Some(id_tok) = tokens.get(idx) {
        if let Ok(id) = id_tok.text.parse::<u64>() {
            class.kill_descriptor = Some(KillDescriptor { target, id });
        }
    }
    class.type_mask |= TypeMask::WRITE;
}

fn collect_select_fields(tokens: &[Token], class: &mut Classification) {
    let stop = tokens.iter().position(|t| t.is_kw("FROM")).unwrap_or(tokens.len());
    let mut idx = 1;
    while idx < stop {
        let tok = &tokens[idx];
        if tok.is_kw(",") || tok.is_kw("*") {
            idx += 1;
            continue;
        }
        if tokens.get(idx + 1).map(|n| n.is_kw("(")).unwrap_or(false) {
            // function call; skip to matching close paren.
            let mut depth = 0;
            idx += 1;
            while idx < stop {
                if tokens[idx].is_kw("(") {
                    depth += 1;
                } else if tokens[idx].is_kw(")") {
                    depth -= 1;
                    if depth == 0 {
                        idx += 1;
                        break;
                    }
                }
                idx += 1;
            }
            continue;
        }
        if is_ident_char(tok.text.chars().next().unwrap_or(' ')) && !is_keyword(&tok.upper) {
            class.fields.push(strip_quotes(&tok.text));
        }
        idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_sets_begin_trx_write() {
        let c = classify_default("BEGIN");
        assert!(c.type_mask.contains(TypeMask::BEGIN_TRX));
    }

    #[test]
    fn start_transaction_read_only_sets_readonly() {
        let c = classify_default("START TRANSACTION READ ONLY");
        assert!(c.type_mask.contains(TypeMask::BEGIN_TRX));
        assert!(c.type_mask.contains(TypeMask::READONLY));
        assert!(!c.type_mask.contains(TypeMask::WRITE));
    }

    #[test]
    fn commit_and_rollback_recognized() {
        assert!(classify_default("COMMIT").type_mask.contains(TypeMask::COMMIT));
        assert!(classify_default("  commit   work ").type_mask.contains(TypeMask::COMMIT));
        assert!(classify_default("ROLLBACK").type_mask.contains(TypeMask::ROLLBACK));
    }

    #[test]
    fn set_autocommit_off_begins_a_transaction() {
        let c = classify_default("SET AUTOCOMMIT=0");
        assert!(c.type_mask.contains(TypeMask::BEGIN_TRX));
        assert!(c.type_mask.contains(TypeMask::DISABLE_AUTOCOMMIT));
        assert!(c.type_mask.contains(TypeMask::SESSION_WRITE));
    }

    #[test]
    fn set_autocommit_on_commits() {
        let c = classify_default("SET AUTOCOMMIT = 1");
        assert!(c.type_mask.contains(TypeMask::COMMIT));
        assert!(c.type_mask.contains(TypeMask::ENABLE_AUTOCOMMIT));
        assert!(c.type_mask.contains(TypeMask::SESSION_WRITE));
    }

    #[test]
    fn set_session_autocommit_is_equivalent_to_bare_set_autocommit() {
        let bare = classify_default("SET AUTOCOMMIT=0");
        let session = classify_default("SET SESSION AUTOCOMMIT=0");
        assert_eq!(bare.type_mask, session.type_mask);
    }

    #[test]
    fn set_global_autocommit_has_no_session_effect() {
        let c = classify_default("SET GLOBAL AUTOCOMMIT = 0");
        assert_eq!(c.type_mask, TypeMask::empty());
    }

    #[test]
    fn whitespace_and_case_do_not_change_classification() {
        let a = classify_default("select * from users where id=1");
        let b = classify_default("   SeLeCt   *   FROM   users   WHERE id=1  ");
        assert_eq!(a.type_mask, b.type_mask);
        assert_eq!(a.tables, b.tables);
    }

    #[test]
    fn comments_are_skipped_between_tokens() {
        let c = classify_default("SELECT /* comment */ id FROM /* x */ t1");
        assert_eq!(c.tables, vec!["t1".to_string()]);
    }

    #[test]
    fn select_extracts_table_and_fields() {
        let c = classify_default("SELECT id, name FROM accounts");
        assert_eq!(c.operation, Operation::Select);
        assert_eq!(c.tables, vec!["accounts".to_string()]);
        assert!(c.fields.contains(&"id".to_string()));
        assert!(c.fields.contains(&"name".to_string()));
    }

    #[test]
    fn insert_extracts_table() {
        let c = classify_default("INSERT INTO orders (id) VALUES (1)");
        assert_eq!(c.operation, Operation::Insert);
        assert_eq!(c.tables, vec!["orders".to_string()]);
        assert!(c.type_mask.contains(TypeMask::WRITE));
    }

    #[test]
    fn qualified_table_splits_database() {
        let c = classify_default("SELECT * FROM mydb.accounts");
        assert_eq!(c.databases, vec!["mydb".to_string()]);
        assert_eq!(c.tables, vec!["accounts".to_string()]);
    }

    #[test]
    fn use_statement_is_session_write() {
        let c = classify_default("USE reporting");
        assert!(c.type_mask.contains(TypeMask::SESSION_WRITE));
        assert_eq!(c.databases, vec!["reporting".to_string()]);
    }

    #[test]
    fn kill_query_extracts_descriptor() {
        let c = classify_default("KILL QUERY 42");
        assert_eq!(
            c.kill_descriptor,
            Some(KillDescriptor { target: KillTarget::Query, id: 42 })
        );
    }

    #[test]
    fn user_variable_assignment_is_a_write() {
        let c = classify_default("SET @x = 1");
        assert!(c.type_mask.contains(TypeMask::USERVAR_WRITE));
    }

    #[test]
    fn user_variable_read_in_select() {
        let c = classify_default("SELECT @x");
        assert!(c.type_mask.contains(TypeMask::USERVAR_READ));
    }

    #[test]
    fn unparseable_input_is_conservative() {
        let c = classify_default("");
        assert_eq!(c.parse_result, ParseResult::Invalid);
        assert!(c.type_mask.contains(TypeMask::WRITE));
    }

    #[test]
    fn select_with_no_table_is_local_read() {
        let c = classify_default("SELECT 1");
        assert!(c.type_mask.contains(TypeMask::LOCAL_READ));
        assert!(c.tables.is_empty());
    }

    #[test]
    fn select_last_insert_id_is_master_read() {
        let c = classify_default("SELECT LAST_INSERT_ID()");
        assert!(c.type_mask.contains(TypeMask::MASTER_READ));
    }

    #[test]
    fn select_for_update_is_master_read() {
        let c = classify_default("SELECT * FROM accounts WHERE id = 1 FOR UPDATE");
        assert!(c.type_mask.contains(TypeMask::MASTER_READ));
    }

    #[test]
    fn select_from_known_tmp_table_sets_read_tmp_table() {
        let mut tmp = std::collections::HashSet::new();
        tmp.insert("scratch".to_string());
        let c = classify_with_tmp_tables("SELECT * FROM scratch", ClassifierOptions::default(), &tmp);
        assert!(c.type_mask.contains(TypeMask::READ_TMP_TABLE));

        let c2 = classify_default("SELECT * FROM scratch");
        assert!(!c2.type_mask.contains(TypeMask::READ_TMP_TABLE));
    }

    #[test]
    fn wire_prepare_stmt_sets_prepare_stmt_bit() {
        let c = wire_prepare_stmt_classification();
        assert!(c.type_mask.contains(TypeMask::PREPARE_STMT));
    }

    #[test]
    fn prepare_and_execute_and_deallocate() {
        let p = classify_default("PREPARE stmt1 FROM 'SELECT 1'");
        assert!(p.type_mask.contains(TypeMask::PREPARE_NAMED_STMT));
        assert_eq!(p.ps_name.as_deref(), Some("stmt1"));

        let e = classify_default("EXECUTE stmt1");
        assert!(e.type_mask.contains(TypeMask::EXEC_STMT));
        assert_eq!(e.operation, Operation::Execute);

        let d = classify_default("DEALLOCATE PREPARE stmt1");
        assert!(d.type_mask.contains(TypeMask::DEALLOC_PREPARE));
    }
}
