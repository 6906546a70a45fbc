use tracing::warn;

use super::config::VisualizerStyle;
use crate::host::{Document, HostError, NodeId};

/// Marker colour for a given total, as `(red, green)`; blue is always zero.
pub fn gradient(total: usize) -> (u8, u8) {
    if total <= 50 {
        return (0, (255 - total * 2) as u8);
    }
    if total <= 205 {
        return ((total + 50) as u8, 0);
    }
    (255, 0)
}

pub fn css_color(total: usize) -> String {
    let (red, green) = gradient(total);
    format!("rgb({red}, {green}, 0)")
}

/// Overlay mirroring the ledger total: a count line plus one marker per
/// bound listener.
///
/// ```text
/// div#visualizer_id
///   div            (markers container)
///     div.item_class * total
///   div.count_class  "total: N"
/// ```
#[derive(Debug)]
pub struct VisualReporter {
    visualizer: NodeId,
    container: NodeId,
    count: NodeId,
    style: VisualizerStyle,
}

impl VisualReporter {
    /// Builds the overlay and appends it to `scope` when there is one.
    pub fn attach(
        document: &Document,
        scope: Option<NodeId>,
        style: &VisualizerStyle,
    ) -> Result<Self, HostError> {
        let visualizer = document.create_element("div");
        document.set_element_id(visualizer, &style.visualizer_id)?;
        document.set_styles(visualizer, &style.visualizer_css)?;

        let container = document.create_element("div");
        document.prepend_child(visualizer, container)?;

        let count = document.create_element("div");
        document.set_class_name(count, &style.count_class)?;
        document.set_styles(count, &style.count_css)?;
        document.append_child(visualizer, count)?;

        if let Some(scope) = scope {
            document.append_child(scope, visualizer)?;
        }

        let reporter = Self {
            visualizer,
            container,
            count,
            style: style.clone(),
        };
        reporter.render(document, 0);
        Ok(reporter)
    }

    pub fn visualizer(&self) -> NodeId {
        self.visualizer
    }

    pub fn markers(&self, document: &Document) -> Vec<NodeId> {
        document.find_by_class(self.container, &self.style.item_class)
    }

    pub fn add_marker(&self, document: &Document, total: usize) {
        let marker = document.create_element("div");
        let result = document
            .set_class_name(marker, &self.style.item_class)
            .and_then(|_| document.append_child(self.container, marker))
            .and_then(|_| document.set_styles(marker, &self.style.item_css));
        if let Err(err) = result {
            warn!(target: "listener_monitor", error = %err, "failed to add visualizer marker");
        }
        self.render(document, total);
    }

    /// Removes the first `n` markers; `n` may be zero.
    pub fn remove_markers(&self, document: &Document, n: usize, total: usize) {
        for marker in self.markers(document).into_iter().take(n) {
            if let Err(err) = document.detach(marker) {
                warn!(target: "listener_monitor", error = %err, "failed to remove visualizer marker");
            }
        }
        self.render(document, total);
    }

    fn render(&self, document: &Document, total: usize) {
        if let Err(err) = document.set_text(self.count, &format!("total: {total}")) {
            warn!(target: "listener_monitor", error = %err, "failed to update visualizer count");
        }
        let color = css_color(total);
        for marker in self.markers(document) {
            if let Err(err) = document.set_style(marker, "background-color", &color) {
                warn!(target: "listener_monitor", error = %err, "failed to recolour visualizer marker");
            }
        }
    }

    pub fn detach(&self, document: &Document) {
        if let Err(err) = document.detach(self.visualizer) {
            warn!(target: "listener_monitor", error = %err, "failed to detach visualizer");
        }
    }
}
