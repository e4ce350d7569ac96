//! Decoy Content
//!
//! Bait served from honeypot traps. Every JSON body carries
//! `"honeypot": true` and any credential-shaped value is an obvious
//! placeholder, so nothing here can leak a real secret even if reused.

use rand::Rng;
use serde_json::{json, Value};

/// Base paths of invisible-link traps
pub const INVISIBLE_LINK_SLOTS: [&str; 5] = [
    "/secret-admin-panel",
    "/hidden-api-docs",
    "/internal-system-status",
    "/private-user-data",
    "/confidential-reports",
];

/// Base paths of hidden-form traps
pub const HIDDEN_FORM_SLOTS: [&str; 4] = [
    "/admin-login-form",
    "/secret-upload-form",
    "/hidden-contact-form",
    "/internal-feedback-form",
];

/// Fake API endpoints
pub const FAKE_API_SLOTS: [&str; 5] = [
    "/api/admin/users",
    "/api/internal/config",
    "/api/secret/data",
    "/api/private/reports",
    "/api/hidden/analytics",
];

/// Decoy pages
pub const DECOY_PAGE_SLOTS: [&str; 4] = [
    "/confidential-documents.html",
    "/internal-reports.html",
    "/admin-dashboard.html",
    "/system-logs.html",
];

const YEAR_MS: u64 = 31_536_000_000;

/// Anchor hidden from humans but followed by naive crawlers
pub fn invisible_link_html(path: &str) -> String {
    format!(
        r#"<a href="{path}" style="position:absolute;left:-9999px;width:1px;height:1px;overflow:hidden" tabindex="-1" aria-hidden="true" rel="nofollow">Admin Panel</a>"#,
        path = path
    )
}

/// Off-screen form that only automated form fillers submit
pub fn hidden_form_html(path: &str) -> String {
    format!(
        r#"<div style="position:absolute;left:-10000px" aria-hidden="true"><form action="{path}" method="post"><label>Admin Access:</label><input type="text" name="admin_key" tabindex="-1" autocomplete="off"><button type="submit" tabindex="-1">Access System</button></form></div>"#,
        path = path
    )
}

/// Fabricated JSON for a fake API endpoint
pub fn fake_api_payload<R: Rng>(path: &str, now_ms: u64, rng: &mut R) -> Value {
    match path {
        "/api/admin/users" => {
            let users: Vec<Value> = (1..=100)
                .map(|i| {
                    json!({
                        "id": i,
                        "username": format!("user{}", i),
                        "email": format!("user{}@example.com", i),
                        "role": if rng.gen_bool(0.2) { "admin" } else { "user" },
                        "created_at": now_ms.saturating_sub(rng.gen_range(0..YEAR_MS)),
                    })
                })
                .collect();
            json!({
                "honeypot": true,
                "users": users,
                "total": 100,
                "page": 1,
                "per_page": 50,
            })
        }
        "/api/internal/config" => json!({
            "honeypot": true,
            "database": {
                "host": "internal-db.example.com",
                "port": 5432,
                "name": "production_db",
                "ssl": true,
            },
            "api_keys": {
                "payments": format!("sk_test_{}", "x".repeat(32)),
                "mail": format!("SG.{}", "x".repeat(32)),
                "cloud": format!("AKIA{}", "X".repeat(16)),
            },
            "features": {
                "debug_mode": false,
                "maintenance_mode": false,
                "rate_limiting": true,
            },
        }),
        _ => json!({
            "honeypot": true,
            "error": false,
            "data": "Sensitive system information",
            "timestamp": now_ms,
        }),
    }
}

/// HTML page for a decoy-content trap
pub fn decoy_page(path: &str) -> String {
    let (title, body) = match path {
        "/confidential-documents.html" => (
            "Confidential Documents",
            r#"<h1>Internal Company Documents</h1><ul><li><a href="/docs/financial-report.pdf">Financial Report</a></li><li><a href="/docs/employee-database.xlsx">Employee Database</a></li><li><a href="/docs/client-contracts.zip">Client Contracts</a></li></ul><p>Access restricted to authorized personnel only.</p>"#,
        ),
        "/internal-reports.html" => (
            "Internal Reports",
            "<h1>System Reports</h1><h2>Performance Metrics</h2><p>Server uptime: 99.9%</p><p>Active users: 15,847</p>",
        ),
        "/admin-dashboard.html" => (
            "Admin Dashboard",
            r#"<h1>Administration</h1><p>Session expired. <a href="/admin-login-form">Sign in again</a>.</p>"#,
        ),
        "/system-logs.html" => (
            "System Logs",
            "<h1>System Logs</h1><pre>[info] backup completed\n[warn] disk usage 81%\n[info] cache warmed</pre>",
        ),
        _ => ("Internal", "<h1>Internal</h1><p>Restricted.</p>"),
    };

    format!(
        r#"<!DOCTYPE html><html><head><meta name="robots" content="noindex,nofollow"><title>{}</title></head><body>{}</body></html>"#,
        title, body
    )
}

/// Large fabricated dataset served to medium-suspicion scrapers
pub fn large_fake_dataset<R: Rng>(now_ms: u64, rng: &mut R) -> Value {
    let description = "This is fake data generated by a honeypot. ".repeat(10);
    let records: Vec<Value> = (1..=100)
        .map(|i| {
            let category = ["A", "B", "C"][rng.gen_range(0..3)];
            json!({
                "id": i,
                "name": format!("Record {}", i),
                "description": description,
                "value": rng.gen_range(0.0..1000.0),
                "category": category,
                "created_at": now_ms.saturating_sub(rng.gen_range(0..YEAR_MS)),
                "metadata": { "fake": true, "honeypot": true },
            })
        })
        .collect();

    json!({
        "honeypot": true,
        "message": "Accessing protected resource",
        "data": records,
        "metadata": {
            "total_records": 10_000,
            "page_size": 100,
            "current_page": 1,
            "generated_at": now_ms,
        },
    })
}
