//! Structured diagnostics.
//!
//! Every topology type describes itself as a [`DiagnosticRecord`]: a kind,
//! flat key/value fields and child records. Rendering is separate, either
//! as JSON or as indented text.

use crate::ambiguity::WindowSolution;
use crate::broken_line::BrokenLine;
use crate::cell::Cell;
use crate::cluster::Cluster;
use crate::clusterizer::{EventReconstruction, TrackCandidate};
use crate::couplet::Couplet;
use crate::experimental::{Point3E, ValueWithError};
use crate::joint::Joint;
use crate::node::Node;
use crate::triplet::Triplet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write;

/// One node of a diagnostic tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub kind: String,
    pub fields: BTreeMap<String, Value>,
    pub children: Vec<DiagnosticRecord>,
}

impl DiagnosticRecord {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn child(mut self, child: DiagnosticRecord) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = DiagnosticRecord>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Indented text, two spaces per level.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = write!(out, "{indent}{}", self.kind);
        for (key, value) in &self.fields {
            let _ = write!(out, " {key}={value}");
        }
        out.push('\n');
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

/// Types that can describe themselves as a diagnostic record.
pub trait Diagnose {
    fn diagnose(&self) -> DiagnosticRecord;
}

fn value(v: &ValueWithError) -> Value {
    json!([v.value, v.error])
}

fn point(p: &Point3E) -> Value {
    json!([p.x.value, p.y.value, p.z.value])
}

impl Diagnose for Cell {
    fn diagnose(&self) -> DiagnosticRecord {
        DiagnosticRecord::new("cell")
            .field("id", self.id())
            .field("center", point(self.center()))
            .field("radius", value(&self.radius()))
            .field("fast", self.is_fast())
            .field("small", self.is_small())
    }
}

impl Diagnose for Couplet {
    fn diagnose(&self) -> DiagnosticRecord {
        DiagnosticRecord::new("couplet")
            .field("a", self.a().id())
            .field("b", self.b().id())
            .field("distance", value(&self.distance()))
            .field("tangents", self.tangents().len())
            .field("skipped", self.skipped())
    }
}

impl Diagnose for Joint {
    fn diagnose(&self) -> DiagnosticRecord {
        DiagnosticRecord::new("joint")
            .field("epb", point(&self.epb))
            .field("kink_phi_deg", self.kink_phi.value.to_degrees())
            .field("kink_theta_deg", self.kink_theta.value.to_degrees())
            .field("chi2", self.chi2)
            .field("ndof", self.ndof)
            .field("p", self.p)
    }
}

impl Diagnose for Triplet {
    fn diagnose(&self) -> DiagnosticRecord {
        DiagnosticRecord::new("triplet")
            .field("cells", json!([self.a().id(), self.b().id(), self.c().id()]))
            .children(self.joints().iter().map(Diagnose::diagnose))
    }
}

impl Diagnose for Node {
    fn diagnose(&self) -> DiagnosticRecord {
        DiagnosticRecord::new("node")
            .field("cell", self.id())
            .field(
                "links",
                self.couplets().iter().map(|c| c.b().id()).collect::<Vec<_>>(),
            )
            .children(self.triplets().iter().map(Diagnose::diagnose))
    }
}

impl Diagnose for Cluster {
    fn diagnose(&self) -> DiagnosticRecord {
        let ambiguous: Vec<bool> = (0..self.len()).map(|i| self.is_ambiguous(i)).collect();
        DiagnosticRecord::new("cluster")
            .field("state", format!("{:?}", self.state()))
            .field("cells", self.nodes().iter().map(Node::id).collect::<Vec<_>>())
            .field("branches", self.branches().to_vec())
            .field("ambiguous", ambiguous)
            .children(self.nodes().iter().map(Diagnose::diagnose))
    }
}

impl Diagnose for BrokenLine {
    fn diagnose(&self) -> DiagnosticRecord {
        DiagnosticRecord::new("broken_line")
            .field("ifirst", self.ifirst)
            .field("ilast", self.ilast)
            .field("nodes", self.nodes.clone())
            .field("points", self.points.iter().map(point).collect::<Vec<_>>())
            .field("chi2", self.chi2)
            .field("ndof", self.ndof)
            .field("p", self.p)
    }
}

impl Diagnose for WindowSolution {
    fn diagnose(&self) -> DiagnosticRecord {
        DiagnosticRecord::new("window")
            .field("ifirst", self.ifirst)
            .field("ilast", self.ilast)
            .field("steps", self.steps)
            .field("truncated", self.truncated)
            .children(self.alternatives.iter().map(Diagnose::diagnose))
    }
}

impl Diagnose for TrackCandidate {
    fn diagnose(&self) -> DiagnosticRecord {
        DiagnosticRecord::new("candidate")
            .child(self.cluster.diagnose())
            .children(self.solutions.iter().map(Diagnose::diagnose))
    }
}

impl Diagnose for EventReconstruction {
    fn diagnose(&self) -> DiagnosticRecord {
        DiagnosticRecord::new("event")
            .field("timed_out", self.timed_out)
            .field("stats", serde_json::to_value(self.stats).unwrap_or(Value::Null))
            .children(self.candidates.iter().map(Diagnose::diagnose))
    }
}
