use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use common_session::RouteNode;

/// Navigation tree of the campus dashboard.
pub fn default_route_tree() -> Vec<RouteNode> {
    vec![
        RouteNode::leaf("/dashboard").with_title("Overview"),
        RouteNode::branch(
            "/academics",
            vec![
                RouteNode::leaf("/academics/courses").with_title("Courses"),
                RouteNode::leaf("/academics/timetable").with_title("Timetable"),
                RouteNode::branch(
                    "/academics/exams",
                    vec![
                        RouteNode::leaf("/academics/exams/schedule").with_title("Schedule"),
                        RouteNode::leaf("/academics/exams/results").with_title("Results"),
                    ],
                )
                .with_title("Exams"),
            ],
        )
        .with_title("Academics"),
        RouteNode::branch(
            "/teacher",
            vec![
                RouteNode::leaf("/teacher/dashboard").with_title("Teacher dashboard"),
                RouteNode::leaf("/teacher/attendance").with_title("Attendance"),
            ],
        )
        .with_title("Teaching"),
        RouteNode::branch(
            "/hostel",
            vec![
                RouteNode::leaf("/hostel/rooms").with_title("Rooms"),
                RouteNode::leaf("/hostel/allocations").with_title("Allocations"),
            ],
        )
        .with_title("Hostel"),
        RouteNode::branch("/library", vec![RouteNode::leaf("/library/loans").with_title("Loans")])
            .with_title("Library"),
        RouteNode::branch(
            "/finance",
            vec![
                RouteNode::leaf("/finance/fees").with_title("Fees"),
                RouteNode::leaf("/finance/payroll").with_title("Payroll"),
            ],
        )
        .with_title("Finance"),
        RouteNode::branch(
            "/admin",
            vec![
                RouteNode::leaf("/admin/users").with_title("Users"),
                RouteNode::leaf("/admin/roles").with_title("Roles"),
            ],
        )
        .with_title("Administration"),
    ]
}

/// Load a route tree from a JSON file, or fall back to the built-in one.
pub fn load_route_tree(path: Option<&Path>) -> Result<Vec<RouteNode>> {
    let Some(path) = path else {
        return Ok(default_route_tree());
    };
    let raw = fs::read(path).with_context(|| format!("reading route tree {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing route tree {}", path.display()))
}
