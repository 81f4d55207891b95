//! Canned payloads served when the email-processing service cannot answer,
//! so the UI always has something to render.
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

pub const BACKEND_UNREACHABLE: &str =
    "Cannot connect to the email processor service. Make sure it's running.";

/// Configuration shown when the service is down.
pub fn default_config() -> Value {
    json!({
        "imap": {
            "server": "localhost",
            "port": 993,
            "username": "",
            "password": "",
            "folder": "INBOX",
        },
        "xampp_mysql": {
            "host": "localhost",
            "user": "root",
            "password": "",
            "database": "work_orders",
            "port": 3306,
        },
        "crm": {
            "base_url": "http://localhost/espocrm",
            "username": "",
            "password": "",
            "import_endpoint": "/api/v1/Import",
        },
        "model_path": "meta-llama/Llama-3.2-1B",
        "csv_path": "/var/data/work_orders.csv",
        "temp_dir": "/tmp/email_attachments",
        "db_path": "/var/data/processing_logs.db",
    })
}

pub fn sample_work_orders() -> Value {
    json!([
        {
            "id": 1,
            "title": "Fix Leaking Roof",
            "priority": "HIGH",
            "description": "Customer reported water damage from roof leak in master bedroom",
            "due_date": "2025-04-10",
            "customer": "John Smith",
            "location": "123 Main St, Anytown, USA",
            "trade": "Roofing",
            "created_at": "2025-04-03T12:30:00",
            "summary": "Urgent roof repair needed due to water damage in master bedroom.",
            "action_items": "1. Inspect roof\n2. Repair damaged shingles\n3. Check for interior water damage",
        },
        {
            "id": 2,
            "title": "HVAC Maintenance",
            "priority": "NORMAL",
            "description": "Annual HVAC system check and filter replacement",
            "due_date": "2025-04-15",
            "customer": "Jane Doe",
            "location": "456 Oak Ave, Somewhere, USA",
            "trade": "HVAC",
            "created_at": "2025-04-02T09:15:00",
            "summary": "Routine annual HVAC maintenance and filter replacement.",
            "action_items": "1. Replace air filters\n2. Clean condenser coils\n3. Check refrigerant levels",
        },
    ])
}

/// Processor status reporting "not running" with a single error log entry.
pub fn offline_processor_status(message: &str) -> Value {
    json!({
        "running": false,
        "last_check": null,
        "emails_processed": 0,
        "logs": [
            {
                "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                "message": message,
                "status": "error",
            }
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_every_section() {
        let cfg = default_config();
        for key in ["imap", "xampp_mysql", "crm", "model_path", "csv_path", "temp_dir", "db_path"] {
            assert!(cfg.get(key).is_some(), "missing {key}");
        }
        assert_eq!(cfg["imap"]["port"], 993);
        assert_eq!(cfg["xampp_mysql"]["port"], 3306);
    }

    #[test]
    fn sample_work_orders_are_two_distinct_entries() {
        let orders = sample_work_orders();
        let orders = orders.as_array().unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0]["priority"], "HIGH");
        assert_eq!(orders[1]["trade"], "HVAC");
    }

    #[test]
    fn offline_status_carries_message_and_timestamp() {
        let status = offline_processor_status(BACKEND_UNREACHABLE);
        assert_eq!(status["running"], false);
        assert!(status["last_check"].is_null());
        let log = &status["logs"][0];
        assert_eq!(log["status"], "error");
        assert_eq!(log["message"], BACKEND_UNREACHABLE);
        let ts = log["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
