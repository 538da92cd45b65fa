use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::AuthenticatedClient;
use crate::error::SessionResult;

/// Canonical form used whenever two paths are compared.
///
/// Surrounding whitespace is trimmed, a leading `/` is enforced and a
/// trailing `/` is dropped, except for the root itself.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    let trimmed = trimmed.trim_start_matches('/');
    format!("/{trimmed}")
}

/// Node of the navigation tree rendered by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteNode {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RouteNode>,
}

impl RouteNode {
    pub fn leaf(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: None,
            children: Vec::new(),
        }
    }

    pub fn branch(path: impl Into<String>, children: Vec<RouteNode>) -> Self {
        Self {
            path: path.into(),
            title: None,
            children,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Leaf paths below (or at) this node, depth first.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }
}

fn collect_leaves(node: &RouteNode, out: &mut Vec<String>) {
    if node.is_leaf() {
        out.push(node.path.clone());
        return;
    }
    for child in &node.children {
        collect_leaves(child, out);
    }
}

/// Keep only the branches that lead to at least one accessible leaf.
pub fn filter_routes<S: AsRef<str>>(tree: &[RouteNode], accessible: &[S]) -> Vec<RouteNode> {
    let allowed: HashSet<String> = accessible
        .iter()
        .map(|path| normalize_path(path.as_ref()))
        .collect();
    prune(tree, &allowed)
}

fn prune(nodes: &[RouteNode], allowed: &HashSet<String>) -> Vec<RouteNode> {
    nodes
        .iter()
        .filter_map(|node| {
            if node.is_leaf() {
                return allowed
                    .contains(&normalize_path(&node.path))
                    .then(|| node.clone());
            }
            let children = prune(&node.children, allowed);
            if children.is_empty() {
                None
            } else {
                Some(RouteNode {
                    path: node.path.clone(),
                    title: node.title.clone(),
                    children,
                })
            }
        })
        .collect()
}

/// Entry of the `my-routes` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessibleRoute {
    pub path: String,
    #[serde(default = "default_active", alias = "isActive")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Normalized, de-duplicated paths the signed-in identity may open right now.
pub async fn fetch_accessible_paths(client: &AuthenticatedClient) -> SessionResult<Vec<String>> {
    let routes: Vec<AccessibleRoute> = client
        .get_json(&client.config().accessible_routes_path)
        .await?;
    let mut seen = HashSet::new();
    let paths: Vec<String> = routes
        .into_iter()
        .filter(|route| route.is_active)
        .map(|route| normalize_path(&route.path))
        .filter(|path| seen.insert(path.clone()))
        .collect();
    debug!(count = paths.len(), "accessible_routes_fetched");
    Ok(paths)
}

#[derive(Debug, Default)]
struct Available {
    paths: Vec<String>,
    tree: Vec<RouteNode>,
}

/// The static navigation tree together with its currently reachable subset.
#[derive(Debug)]
pub struct AvailableRoutes {
    full_tree: Vec<RouteNode>,
    current: RwLock<Available>,
}

impl AvailableRoutes {
    pub fn new(full_tree: Vec<RouteNode>) -> Self {
        Self {
            full_tree,
            current: RwLock::new(Available::default()),
        }
    }

    /// Replace the reachable set and re-filter the tree.
    pub fn apply<S: AsRef<str>>(&self, accessible: &[S]) {
        let paths: Vec<String> = accessible
            .iter()
            .map(|path| normalize_path(path.as_ref()))
            .collect();
        let tree = filter_routes(&self.full_tree, &paths);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Available { paths, tree };
    }

    /// Refetch the reachable paths for the current identity.
    pub async fn recompute(&self, client: &AuthenticatedClient) -> SessionResult<Vec<String>> {
        let paths = fetch_accessible_paths(client).await?;
        self.apply(&paths);
        Ok(paths)
    }

    pub fn clear(&self) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Available::default();
    }

    pub fn paths(&self) -> Vec<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .paths
            .clone()
    }

    pub fn contains(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .paths
            .contains(&path)
    }

    /// Filtered tree for rendering.
    pub fn tree(&self) -> Vec<RouteNode> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tree
            .clone()
    }

    pub fn full_tree(&self) -> &[RouteNode] {
        &self.full_tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campus_tree() -> Vec<RouteNode> {
        vec![
            RouteNode::leaf("/dashboard"),
            RouteNode::branch(
                "/academics",
                vec![
                    RouteNode::leaf("/academics/courses"),
                    RouteNode::branch(
                        "/academics/exams",
                        vec![
                            RouteNode::leaf("/academics/exams/schedule"),
                            RouteNode::leaf("/academics/exams/results"),
                        ],
                    ),
                ],
            ),
            RouteNode::branch("/hostel", vec![RouteNode::leaf("/hostel/rooms")]),
        ]
    }

    #[test]
    fn normalize_path_cases() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path(" teacher/dashboard/ "), "/teacher/dashboard");
        assert_eq!(normalize_path("/teacher/dashboard"), "/teacher/dashboard");
    }

    #[test]
    fn prunes_branches_without_accessible_leaves() {
        let filtered = filter_routes(&campus_tree(), &["/dashboard", "/academics/exams/results/"]);

        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].path, "/dashboard");
        let academics = &filtered[1];
        assert_eq!(academics.children.len(), 1);
        assert_eq!(
            academics.leaf_paths(),
            vec!["/academics/exams/results".to_string()]
        );
    }

    #[test]
    fn parent_path_alone_does_not_keep_branch() {
        let filtered = filter_routes(&campus_tree(), &["/hostel"]);
        assert!(filtered.is_empty());
    }

    #[test]
    fn empty_accessible_list_prunes_everything() {
        let filtered = filter_routes::<&str>(&campus_tree(), &[]);
        assert!(filtered.is_empty());
    }

    #[test]
    fn route_tree_loads_from_json() {
        let tree: Vec<RouteNode> = serde_json::from_str(
            r#"[{"path": "/library", "title": "Library",
                "children": [{"path": "/library/loans"}]}]"#,
        )
        .expect("tree");
        assert_eq!(tree[0].title.as_deref(), Some("Library"));
        assert!(tree[0].children[0].is_leaf());
    }

    #[test]
    fn available_routes_apply_and_clear() {
        let available = AvailableRoutes::new(campus_tree());
        available.apply(&["/hostel/rooms"]);
        assert!(available.contains("/hostel/rooms/"));
        assert_eq!(available.tree().len(), 1);

        available.clear();
        assert!(available.paths().is_empty());
        assert!(available.tree().is_empty());
        assert_eq!(available.full_tree().len(), 3);
    }

    #[test]
    fn accessible_route_defaults_active() {
        let route: AccessibleRoute =
            serde_json::from_str(r#"{"path": "/dashboard"}"#).expect("route");
        assert!(route.is_active);
        let route: AccessibleRoute =
            serde_json::from_str(r#"{"path": "/old", "isActive": false}"#).expect("route");
        assert!(!route.is_active);
    }
}
