//! Tool schemas declared to the completion service.
//!
//! These are the shapes the model's structured output is validated against;
//! the dispatcher re-validates on execution, so schema and dispatch stay the
//! only two places that know a tool's surface.

use serde_json::{json, Value};

pub const CREATE_TASK: &str = "create_task";
pub const SEARCH_TASKS: &str = "search_tasks";
pub const UPDATE_TASK_STATUS: &str = "update_task_status";
pub const UPDATE_TASK_FIELDS: &str = "update_task_fields";
pub const GET_TASK_DETAIL: &str = "get_task_detail";
pub const APPEND_TASK_CONTENT: &str = "append_task_content";
pub const REQUEST_USER_CONFIRMATION: &str = "request_user_confirmation";

const ALL_STATUSES: [&str; 5] = ["TODO", "To Schedule", "In progress", "Done", "Won't do"];
const OPEN_STATUSES: [&str; 3] = ["TODO", "To Schedule", "In progress"];
const LEVELS: [&str; 3] = ["High", "Medium", "Low"];
const CATEGORIES: [&str; 2] = ["Must Do", "Nice to have"];

pub fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": CREATE_TASK,
            "description": "Create a new task in the task database.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Concise task title (keep the original language, refine for clarity)"
                    },
                    "status": {
                        "type": "string",
                        "enum": OPEN_STATUSES,
                        "description": "Task status. Default: TODO"
                    },
                    "importance": {"type": "string", "enum": LEVELS},
                    "urgency": {"type": "string", "enum": LEVELS},
                    "category": {"type": "string", "enum": CATEGORIES},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "product": {"type": "array", "items": {"type": "string"}},
                    "action_date": {
                        "type": "string",
                        "description": "Due date in YYYY-MM-DD format"
                    },
                    "link": {"type": "string", "description": "URL if the input contains one"}
                },
                "required": ["name"]
            }
        }),
        json!({
            "name": SEARCH_TASKS,
            "description": "Search existing tasks by title keywords. Returns up to 10 results with body content included.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Keywords to search for in task titles"
                    },
                    "active_only": {
                        "type": "boolean",
                        "description": "Only search open tasks (not Done/Won't do). Default: true"
                    }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": UPDATE_TASK_STATUS,
            "description": "Update a task's status.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "page_id": {"type": "string", "description": "Record id of the task to update"},
                    "new_status": {"type": "string", "enum": ALL_STATUSES}
                },
                "required": ["page_id", "new_status"]
            }
        }),
        json!({
            "name": UPDATE_TASK_FIELDS,
            "description": "Update any subset of a task's fields. Only the fields provided are changed.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "page_id": {"type": "string", "description": "Record id of the task to update"},
                    "name": {"type": "string"},
                    "status": {"type": "string", "enum": ALL_STATUSES},
                    "importance": {"type": "string", "enum": LEVELS},
                    "urgency": {"type": "string", "enum": LEVELS},
                    "category": {"type": "string", "enum": CATEGORIES},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "product": {"type": "array", "items": {"type": "string"}},
                    "action_date": {"type": "string", "description": "Due date in YYYY-MM-DD format"},
                    "link": {"type": "string"}
                },
                "required": ["page_id"]
            }
        }),
        json!({
            "name": GET_TASK_DETAIL,
            "description": "Get full details and body content of a specific task by record id. Use this when the user wants to know what's inside a task.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "page_id": {"type": "string", "description": "Record id of the task"}
                },
                "required": ["page_id"]
            }
        }),
        json!({
            "name": APPEND_TASK_CONTENT,
            "description": "Append content blocks to a task's body (headings, paragraphs, dividers).",
            "input_schema": {
                "type": "object",
                "properties": {
                    "page_id": {"type": "string", "description": "Record id of the task"},
                    "blocks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "type": {
                                    "type": "string",
                                    "enum": ["heading_1", "heading_2", "heading_3", "paragraph", "divider"]
                                },
                                "text": {
                                    "type": "string",
                                    "description": "Block text (ignored for divider)"
                                }
                            },
                            "required": ["type"]
                        }
                    }
                },
                "required": ["page_id", "blocks"]
            }
        }),
        json!({
            "name": REQUEST_USER_CONFIRMATION,
            "description": "Present tasks with inline buttons for the user to confirm a status change. Use this when the user asks to update task status — always confirm before changing. The chat renders buttons and waits for the user's tap.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "page_id": {"type": "string"},
                                "title": {"type": "string"},
                                "current_status": {"type": "string"}
                            },
                            "required": ["page_id", "title", "current_status"]
                        },
                        "description": "Tasks to present for confirmation"
                    },
                    "new_status": {
                        "type": "string",
                        "description": "The target status to change to"
                    },
                    "header_message": {
                        "type": "string",
                        "description": "Message to show above the buttons"
                    }
                },
                "required": ["tasks", "new_status"]
            }
        }),
    ]
}
