//! Conversion of a `GET_TREE` reply into a [`Tree`].
//!
//! Windows are the leaf containers below a workspace, found in both
//! `nodes` and `floating_nodes`.  The scratchpad appears as the
//! `__i3_scratch` workspace of the `__i3` output.

use crate::model::{Output, Rect, Tree, Window, Workspace, SCRATCHPAD_OUTPUT};
use serde::Deserialize;

/// The subset of an i3-ipc tree node that i3pm reads.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Node {
    pub id: i64,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: Option<String>,
    pub num: Option<i32>,
    pub focused: bool,
    pub rect: Rect,
    pub marks: Vec<String>,
    pub pid: Option<u32>,
    pub app_id: Option<String>,
    pub window_properties: Option<WindowProperties>,
    /// X11 window id (i3, XWayland).
    pub window: Option<u64>,
    pub fullscreen_mode: u8,
    pub active: Option<bool>,
    pub primary: bool,
    pub current_workspace: Option<String>,
    pub nodes: Vec<Node>,
    pub floating_nodes: Vec<Node>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WindowProperties {
    pub class: Option<String>,
    pub instance: Option<String>,
    pub title: Option<String>,
}

impl Node {
    fn is_window(&self) -> bool {
        matches!(self.node_type.as_str(), "con" | "floating_con")
            && self.nodes.is_empty()
            && self.floating_nodes.is_empty()
            && (self.pid.is_some()
                || self.app_id.is_some()
                || self.window.is_some()
                || self.window_properties.is_some())
    }

    fn any_focused(&self) -> bool {
        self.focused
            || self.nodes.iter().any(Node::any_focused)
            || self.floating_nodes.iter().any(Node::any_focused)
    }

    fn to_window(&self, workspace: &str, floating: bool) -> Window {
        let props = self.window_properties.as_ref();
        let non_empty = |s: &Option<String>| s.as_ref().filter(|s| !s.is_empty()).cloned();
        let class = non_empty(&self.app_id)
            .or_else(|| props.and_then(|p| non_empty(&p.class)))
            .or_else(|| props.and_then(|p| non_empty(&p.instance)))
            .unwrap_or_default();
        let instance = props
            .and_then(|p| non_empty(&p.instance))
            .unwrap_or_else(|| class.clone());
        let title = non_empty(&self.name)
            .or_else(|| props.and_then(|p| non_empty(&p.title)))
            .unwrap_or_default();
        Window {
            id: self.id,
            pid: self.pid.filter(|&p| p > 0),
            class,
            instance,
            title,
            marks: self.marks.clone(),
            workspace: workspace.to_string(),
            focused: self.focused,
            floating,
            fullscreen: self.fullscreen_mode != 0,
            geometry: self.rect,
        }
    }
}

/// Collect every window below `node`.
fn collect_windows(node: &Node, workspace: &str, floating: bool, out: &mut Vec<Window>) {
    if node.is_window() {
        out.push(node.to_window(workspace, floating || node.node_type == "floating_con"));
        return;
    }
    for child in &node.nodes {
        collect_windows(child, workspace, floating, out);
    }
    for child in &node.floating_nodes {
        collect_windows(child, workspace, true, out);
    }
}

fn to_workspace(node: &Node, output: &str, current: Option<&str>) -> Workspace {
    let name = node.name.clone().unwrap_or_default();
    let mut windows = Vec::new();
    for child in &node.nodes {
        collect_windows(child, &name, false, &mut windows);
    }
    for child in &node.floating_nodes {
        collect_windows(child, &name, true, &mut windows);
    }
    let focused = node.any_focused();
    Workspace {
        num: node.num.filter(|&n| n >= 0),
        visible: current.map_or(focused, |c| c == name),
        focused,
        output: output.to_string(),
        windows,
        name,
    }
}

fn to_output(node: &Node) -> Output {
    let name = node.name.clone().unwrap_or_default();
    let workspaces = node
        .nodes
        .iter()
        .filter(|n| n.node_type == "workspace")
        .map(|n| to_workspace(n, &name, node.current_workspace.as_deref()))
        .collect();
    Output {
        active: node.active.unwrap_or(name != SCRATCHPAD_OUTPUT),
        primary: node.primary,
        geometry: node.rect,
        role: String::new(),
        workspaces,
        name,
    }
}

/// Build a [`Tree`] from the root node.  i3 nests workspaces inside a
/// `content` container of each output; both layouts are handled.
pub fn tree_from_root(root: &Node) -> Tree {
    let outputs = root
        .nodes
        .iter()
        .filter(|n| n.node_type == "output")
        .map(|n| {
            let mut output = to_output(n);
            if output.workspaces.is_empty() {
                let name = output.name.clone();
                for content in n.nodes.iter().filter(|c| c.node_type == "con") {
                    output.workspaces.extend(
                        content
                            .nodes
                            .iter()
                            .filter(|w| w.node_type == "workspace")
                            .map(|w| to_workspace(w, &name, n.current_workspace.as_deref())),
                    );
                }
            }
            output
        })
        .collect();
    Tree::new(outputs)
}

/// Parse a raw `GET_TREE` reply.
pub fn parse_tree(payload: &[u8]) -> Result<Tree, serde_json::Error> {
    let root: Node = serde_json::from_slice(payload)?;
    Ok(tree_from_root(&root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SCRATCHPAD_WORKSPACE;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "id": 1, "type": "root", "name": "root",
            "nodes": [
                {
                    "id": 2, "type": "output", "name": "__i3",
                    "nodes": [{
                        "id": 3, "type": "workspace", "name": "__i3_scratch", "num": -1,
                        "nodes": [],
                        "floating_nodes": [{
                            "id": 4, "type": "floating_con", "nodes": [],
                            "pid": 400, "app_id": "slack", "name": "Slack",
                            "marks": ["project:alpha:4"],
                            "rect": { "x": 0, "y": 0, "width": 800, "height": 600 }
                        }]
                    }]
                },
                {
                    "id": 10, "type": "output", "name": "DP-1", "active": true, "primary": true,
                    "current_workspace": "1",
                    "rect": { "x": 0, "y": 0, "width": 2560, "height": 1440 },
                    "nodes": [
                        {
                            "id": 11, "type": "workspace", "name": "1", "num": 1,
                            "nodes": [{
                                "id": 12, "type": "con", "name": null, "layout": "splith",
                                "nodes": [
                                    { "id": 13, "type": "con", "pid": 1300, "app_id": "foot",
                                      "name": "shell", "focused": true, "nodes": [] },
                                    { "id": 14, "type": "con", "pid": 1400, "app_id": null,
                                      "name": "Code",
                                      "window_properties": { "class": "Code", "instance": "code" },
                                      "fullscreen_mode": 1, "nodes": [] }
                                ]
                            }],
                            "floating_nodes": [
                                { "id": 15, "type": "floating_con", "pid": 1500, "app_id": "mpv",
                                  "name": "video", "nodes": [],
                                  "rect": { "x": 10, "y": 20, "width": 640, "height": 360 } }
                            ]
                        },
                        { "id": 20, "type": "workspace", "name": "mail", "num": -1, "nodes": [] }
                    ]
                }
            ]
        })
    }

    fn parse(v: serde_json::Value) -> Tree {
        parse_tree(v.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn windows_and_workspaces() {
        let tree = parse(sample());
        assert_eq!(tree.outputs.len(), 2);

        let ids: Vec<i64> = tree.windows().map(|w| w.id).collect();
        assert_eq!(ids, vec![4, 13, 14, 15]);

        let foot = tree.window(13).unwrap();
        assert_eq!(foot.class, "foot");
        assert_eq!(foot.instance, "foot");
        assert_eq!(foot.workspace, "1");
        assert!(foot.focused);
        assert!(!foot.floating);

        let code = tree.window(14).unwrap();
        assert_eq!(code.class, "Code");
        assert_eq!(code.instance, "code");
        assert!(code.fullscreen);

        let mpv = tree.window(15).unwrap();
        assert!(mpv.floating);
        assert_eq!(mpv.geometry.width, 640);
    }

    #[test]
    fn scratchpad_windows_are_hidden() {
        let tree = parse(sample());
        let slack = tree.window(4).unwrap();
        assert_eq!(slack.workspace, SCRATCHPAD_WORKSPACE);
        assert!(slack.is_hidden());
        assert_eq!(slack.owner(), Some("alpha"));
        assert_eq!(tree.outputs[0].role, "scratchpad");
    }

    #[test]
    fn workspace_numbers_focus_and_visibility() {
        let tree = parse(sample());
        let one = tree.workspace("1").unwrap();
        assert_eq!(one.num, Some(1));
        assert!(one.focused);
        assert!(one.visible);
        assert_eq!(one.output, "DP-1");

        let mail = tree.workspace("mail").unwrap();
        assert_eq!(mail.num, None);
        assert!(!mail.visible);
        assert_eq!(tree.focused_workspace().unwrap().name, "1");
        assert_eq!(tree.outputs[1].role, "primary");
    }

    #[test]
    fn i3_content_containers() {
        let v = json!({
            "id": 1, "type": "root",
            "nodes": [{
                "id": 2, "type": "output", "name": "HDMI-1",
                "nodes": [
                    { "id": 3, "type": "dockarea", "nodes": [] },
                    { "id": 4, "type": "con", "name": "content", "nodes": [
                        { "id": 5, "type": "workspace", "name": "2", "num": 2, "nodes": [
                            { "id": 6, "type": "con", "window": 8388610,
                              "window_properties": { "class": "URxvt", "instance": "urxvt", "title": "~" },
                              "nodes": [] }
                        ]}
                    ]}
                ]
            }]
        });
        let tree = parse(v);
        let w = tree.window(6).unwrap();
        assert_eq!(w.workspace, "2");
        assert_eq!(w.class, "URxvt");
        assert_eq!(w.title, "~");
        assert_eq!(w.pid, None);
    }
}
