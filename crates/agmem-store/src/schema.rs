use agmem_types::Result;
use rusqlite::Connection;

use crate::db::db_err;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 3;

/// The five tables that participate in branching.
///
/// Each carries PRIMARY KEY (id, branch_name); a fork copies the parent's
/// rows under the child branch name. Registry tables are never branched.
pub const BRANCHED_TABLES: &[&str] = &[
    "facts",
    "observations",
    "relations",
    "conversations",
    "messages",
];

/// Column lists (minus `branch_name`) used by the row-copy fork and the
/// snapshot payload reader. Order matches the CREATE TABLE statements below.
pub(crate) fn data_columns(table: &str) -> &'static str {
    match table {
        "facts" => {
            "id, fact_text, embedding, category, confidence, status, source_type, \
             source_id, parent_id, session_id, agent_id, task_id, metadata, created_at"
        }
        "observations" => {
            "id, observation_type, tool_name, summary, embedding, raw_input, \
             raw_output, session_id, metadata, created_at"
        }
        "relations" => {
            "id, source_entity, target_entity, relation_type, properties, confidence, \
             valid_from, valid_to, session_id, created_at"
        }
        "conversations" => {
            "id, session_id, agent_id, task_id, title, parent_conversation_id, \
             fork_point_message_id, status, message_count, total_tokens, model, \
             metadata, created_at"
        }
        "messages" => {
            "id, conversation_id, session_id, agent_id, role, content, thinking, \
             embedding, tool_calls, token_count, model, sequence_num, created_at"
        }
        other => panic!("not a branched table: {other}"),
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(db_err)?;

    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS facts (
            id TEXT NOT NULL,
            branch_name TEXT NOT NULL,
            fact_text TEXT NOT NULL,
            embedding TEXT,
            category TEXT,
            confidence REAL NOT NULL DEFAULT 1.0,
            status TEXT NOT NULL DEFAULT 'active',
            source_type TEXT,
            source_id TEXT,
            parent_id TEXT,
            session_id TEXT,
            agent_id TEXT,
            task_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, branch_name)
        );

        CREATE TABLE IF NOT EXISTS observations (
            id TEXT NOT NULL,
            branch_name TEXT NOT NULL,
            observation_type TEXT NOT NULL,
            tool_name TEXT,
            summary TEXT NOT NULL,
            embedding TEXT,
            raw_input TEXT,
            raw_output TEXT,
            session_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, branch_name)
        );

        CREATE TABLE IF NOT EXISTS relations (
            id TEXT NOT NULL,
            branch_name TEXT NOT NULL,
            source_entity TEXT NOT NULL,
            target_entity TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            properties TEXT NOT NULL DEFAULT '{}',
            confidence REAL NOT NULL DEFAULT 1.0,
            valid_from TEXT NOT NULL,
            valid_to TEXT,
            session_id TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, branch_name)
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT NOT NULL,
            branch_name TEXT NOT NULL,
            session_id TEXT,
            agent_id TEXT,
            task_id TEXT,
            title TEXT,
            parent_conversation_id TEXT,
            fork_point_message_id TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            message_count INTEGER NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            model TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, branch_name)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT NOT NULL,
            branch_name TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            session_id TEXT,
            agent_id TEXT,
            role TEXT NOT NULL,
            content TEXT,
            thinking TEXT,
            embedding TEXT,
            tool_calls TEXT NOT NULL DEFAULT '[]',
            token_count INTEGER NOT NULL DEFAULT 0,
            model TEXT,
            sequence_num INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, branch_name)
        );

        CREATE TABLE IF NOT EXISTS branch_registry (
            branch_name TEXT PRIMARY KEY,
            parent_branch TEXT,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            forked_at TEXT NOT NULL,
            merged_at TEXT,
            merge_strategy TEXT,
            metadata TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS snapshots (
            id TEXT PRIMARY KEY,
            branch_name TEXT NOT NULL,
            label TEXT,
            captured_at TEXT NOT NULL,
            native INTEGER NOT NULL DEFAULT 0,
            payload TEXT
        );

        CREATE TABLE IF NOT EXISTS merge_history (
            id TEXT PRIMARY KEY,
            source_branch TEXT NOT NULL,
            target_branch TEXT NOT NULL,
            strategy TEXT NOT NULL,
            items_merged TEXT NOT NULL DEFAULT '[]',
            items_rejected TEXT NOT NULL DEFAULT '[]',
            conflict_resolution TEXT NOT NULL DEFAULT '{}',
            merged_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            parent_session TEXT,
            branch_name TEXT NOT NULL,
            project_path TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            summary TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY,
            objective TEXT NOT NULL,
            task_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            created_branch TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task_agents (
            task_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            assigned_branch TEXT NOT NULL,
            role TEXT,
            joined_at TEXT NOT NULL,
            left_at TEXT,
            PRIMARY KEY (task_id, agent_id)
        );

        CREATE TABLE IF NOT EXISTS scores (
            id TEXT PRIMARY KEY,
            target_type TEXT NOT NULL,
            target_id TEXT NOT NULL,
            scorer TEXT NOT NULL,
            dimension TEXT NOT NULL,
            value REAL NOT NULL,
            explanation TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS template_branches (
            name TEXT PRIMARY KEY,
            source_branch TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            applicable_task_types TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]',
            description TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS replays (
            id TEXT PRIMARY KEY,
            source_conversation_id TEXT NOT NULL,
            replay_conversation_id TEXT NOT NULL,
            pivot_message_id TEXT NOT NULL,
            branch_name TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS consolidation_history (
            id TEXT PRIMARY KEY,
            branch_name TEXT NOT NULL,
            observations_processed INTEGER NOT NULL,
            facts_created INTEGER NOT NULL,
            facts_updated INTEGER NOT NULL,
            facts_deduplicated INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_facts_branch_status ON facts(branch_name, status);
        CREATE INDEX IF NOT EXISTS idx_facts_parent ON facts(parent_id, branch_name);
        CREATE INDEX IF NOT EXISTS idx_observations_branch ON observations(branch_name, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(branch_name, source_entity);
        CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(branch_name, target_entity);
        CREATE INDEX IF NOT EXISTS idx_conversations_branch ON conversations(branch_name);
        CREATE INDEX IF NOT EXISTS idx_messages_conv ON messages(conversation_id, branch_name, sequence_num);
        CREATE INDEX IF NOT EXISTS idx_snapshots_branch ON snapshots(branch_name);
        CREATE INDEX IF NOT EXISTS idx_scores_target ON scores(target_type, target_id);
        CREATE INDEX IF NOT EXISTS idx_task_agents_task ON task_agents(task_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS facts_fts USING fts5(
            fact_text,
            content='facts',
            content_rowid='rowid'
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
            summary,
            content='observations',
            content_rowid='rowid'
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
            content,
            content='messages',
            content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS facts_fts_ai AFTER INSERT ON facts BEGIN
            INSERT INTO facts_fts(rowid, fact_text) VALUES (new.rowid, new.fact_text);
        END;
        CREATE TRIGGER IF NOT EXISTS facts_fts_ad AFTER DELETE ON facts BEGIN
            INSERT INTO facts_fts(facts_fts, rowid, fact_text)
            VALUES ('delete', old.rowid, old.fact_text);
        END;
        CREATE TRIGGER IF NOT EXISTS facts_fts_au AFTER UPDATE ON facts BEGIN
            INSERT INTO facts_fts(facts_fts, rowid, fact_text)
            VALUES ('delete', old.rowid, old.fact_text);
            INSERT INTO facts_fts(rowid, fact_text) VALUES (new.rowid, new.fact_text);
        END;

        CREATE TRIGGER IF NOT EXISTS observations_fts_ai AFTER INSERT ON observations BEGIN
            INSERT INTO observations_fts(rowid, summary) VALUES (new.rowid, new.summary);
        END;
        CREATE TRIGGER IF NOT EXISTS observations_fts_ad AFTER DELETE ON observations BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, summary)
            VALUES ('delete', old.rowid, old.summary);
        END;

        CREATE TRIGGER IF NOT EXISTS messages_fts_ai AFTER INSERT ON messages BEGIN
            INSERT INTO messages_fts(rowid, content) VALUES (new.rowid, new.content);
        END;
        CREATE TRIGGER IF NOT EXISTS messages_fts_ad AFTER DELETE ON messages BEGIN
            INSERT INTO messages_fts(messages_fts, rowid, content)
            VALUES ('delete', old.rowid, old.content);
        END;
        "#,
    )
    .map_err(db_err)?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(db_err)?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS facts_fts;
        DROP TABLE IF EXISTS observations_fts;
        DROP TABLE IF EXISTS messages_fts;
        DROP TABLE IF EXISTS facts;
        DROP TABLE IF EXISTS observations;
        DROP TABLE IF EXISTS relations;
        DROP TABLE IF EXISTS conversations;
        DROP TABLE IF EXISTS messages;
        DROP TABLE IF EXISTS branch_registry;
        DROP TABLE IF EXISTS snapshots;
        DROP TABLE IF EXISTS merge_history;
        DROP TABLE IF EXISTS sessions;
        DROP TABLE IF EXISTS tasks;
        DROP TABLE IF EXISTS task_agents;
        DROP TABLE IF EXISTS scores;
        DROP TABLE IF EXISTS template_branches;
        DROP TABLE IF EXISTS replays;
        DROP TABLE IF EXISTS consolidation_history;
        "#,
    )
    .map_err(db_err)
}
