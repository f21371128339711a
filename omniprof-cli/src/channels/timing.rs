//! Timing channel: wall and CPU time, ranked hotspots, line timings and the
//! call tree.

use super::procfs::{self, CpuTicks, ProcFs, SwitchCounts};
use super::{ChannelError, ChannelKind, ChannelSnapshot, InstrumentationChannel, StopContext};
use crate::sandbox::WorkerProbe;
use omniprof_ipc::{FunctionKey, FunctionStat, Instruments, LineProfile, RuntimeTelemetry};
use omniprof_report::{
    CallTreeNode, ContextSwitchCounts, Hotspot, LineProfileSection, LineTiming, TimeSnapshot,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Deepest call path expanded in the tree
pub const MAX_TREE_DEPTH: usize = 64;
/// Upper bound on nodes in one call tree
pub const MAX_TREE_NODES: usize = 10_000;

/// Wall and CPU time of the measured window plus the function profile.
pub struct TimingChannel {
    procfs: Arc<dyn ProcFs>,
    hotspot_limit: usize,
    line_level: bool,
    call_tree: bool,
    profiler: bool,
    started: Option<Instant>,
    cpu_start: Option<CpuTicks>,
    switches_start: Option<SwitchCounts>,
}

impl TimingChannel {
    /// Channel reading fallback counters through `procfs`
    pub fn new(procfs: Arc<dyn ProcFs>) -> Self {
        Self {
            procfs,
            hotspot_limit: 10,
            line_level: false,
            call_tree: true,
            profiler: true,
            started: None,
            cpu_start: None,
            switches_start: None,
        }
    }

    /// Number of hotspots kept
    pub fn hotspot_limit(mut self, limit: usize) -> Self {
        self.hotspot_limit = limit;
        self
    }

    /// Collect per-line timings
    pub fn line_level(mut self, enabled: bool) -> Self {
        self.line_level = enabled;
        self
    }

    /// Rebuild the call tree
    pub fn call_tree(mut self, enabled: bool) -> Self {
        self.call_tree = enabled;
        self
    }

    fn cpu_split(&self, ctx: &StopContext<'_>) -> Result<(f64, f64), ChannelError> {
        if let Some(cpu) = ctx.telemetry.and_then(|t| t.cpu) {
            return Ok((cpu.user, cpu.system));
        }
        // Abandoned run: fall back to the kernel's view of the still-live worker
        let start = self.cpu_start.ok_or(ChannelError::MissingTelemetry("cpu"))?;
        let end = procfs::read_cpu_ticks(self.procfs.as_ref(), ctx.probe.pid)?;
        Ok(end.seconds_since(&start))
    }

    fn context_switches(&self, ctx: &StopContext<'_>) -> Option<ContextSwitchCounts> {
        if let Some(switches) = ctx.telemetry.and_then(|t| t.context_switches) {
            return Some(ContextSwitchCounts {
                voluntary: switches.voluntary,
                involuntary: switches.involuntary,
            });
        }
        let start = self.switches_start?;
        match procfs::read_switches(self.procfs.as_ref(), ctx.probe.pid) {
            Ok(end) => {
                let delta = end.since(&start);
                Some(ContextSwitchCounts {
                    voluntary: delta.voluntary,
                    involuntary: delta.involuntary,
                })
            }
            Err(e) => {
                tracing::debug!("no context switch counters for worker {}: {}", ctx.probe.pid, e);
                None
            }
        }
    }

    fn sections(&self, telemetry: Option<&RuntimeTelemetry>) -> Sections {
        let profile = telemetry.and_then(|t| t.profile.as_deref()).unwrap_or(&[]);
        let hotspots = rank_hotspots(profile, self.hotspot_limit);
        let call_tree = (self.call_tree && !profile.is_empty()).then(|| build_call_tree(profile));
        let line_profiles = if self.line_level {
            telemetry
                .and_then(|t| t.lines.as_deref())
                .map(|lines| lines.iter().map(line_section).collect())
        } else {
            None
        };
        Sections {
            hotspots,
            call_tree,
            line_profiles,
        }
    }
}

struct Sections {
    hotspots: Vec<Hotspot>,
    call_tree: Option<Vec<CallTreeNode>>,
    line_profiles: Option<Vec<LineProfileSection>>,
}

impl InstrumentationChannel for TimingChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Timing
    }

    fn instruments(&self) -> Instruments {
        Instruments {
            cpu: true,
            profiler: self.profiler,
            line_trace: self.line_level,
            ..Instruments::none()
        }
    }

    fn start(&mut self, probe: &WorkerProbe) -> Result<(), ChannelError> {
        self.profiler = probe.capabilities.has_profiler;
        if !probe.capabilities.has_line_trace {
            self.line_level = false;
        }
        self.cpu_start = match procfs::read_cpu_ticks(self.procfs.as_ref(), probe.pid) {
            Ok(ticks) => Some(ticks),
            Err(e) => {
                tracing::debug!("no kernel cpu counters for worker {}: {}", probe.pid, e);
                None
            }
        };
        self.switches_start = procfs::read_switches(self.procfs.as_ref(), probe.pid).ok();
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self, ctx: &StopContext<'_>) -> Result<ChannelSnapshot, ChannelError> {
        let started = self.started.take().ok_or(ChannelError::NotStarted)?;
        let wall_time = started.elapsed().as_secs_f64();
        let (user_time, system_time) = self.cpu_split(ctx)?;
        let context_switches = self.context_switches(ctx);
        self.switches_start = None;
        let measured_wall = ctx.telemetry.and_then(|t| t.wall_time).unwrap_or(wall_time);
        let Sections {
            hotspots,
            call_tree,
            line_profiles,
        } = self.sections(ctx.telemetry);

        Ok(ChannelSnapshot::Time(TimeSnapshot {
            wall_time,
            cpu_time: user_time + system_time,
            user_time,
            system_time,
            cpu_percent: TimeSnapshot::utilisation(user_time + system_time, measured_wall),
            context_switches,
            hotspots,
            line_profiles,
            call_tree,
        }))
    }
}

fn hotspot_order(a: &FunctionStat, b: &FunctionStat) -> Ordering {
    b.cumulative_time
        .total_cmp(&a.cumulative_time)
        .then_with(|| b.self_time.total_cmp(&a.self_time))
        .then_with(|| b.calls.cmp(&a.calls))
        .then_with(|| a.key.cmp(&b.key))
}

/// Top `limit` functions by cumulative time, then self time, then calls.
pub fn rank_hotspots(stats: &[FunctionStat], limit: usize) -> Vec<Hotspot> {
    let mut ranked: Vec<&FunctionStat> = stats.iter().collect();
    ranked.sort_by(|a, b| hotspot_order(a, b));
    ranked
        .into_iter()
        .take(limit)
        .map(|stat| Hotspot {
            function: stat.key.function.clone(),
            file: stat.key.file.clone(),
            line: stat.key.line,
            calls: stat.calls,
            primitive_calls: stat.primitive_calls,
            self_time: stat.self_time,
            cumulative_time: stat.cumulative_time,
        })
        .collect()
}

fn line_section(profile: &LineProfile) -> LineProfileSection {
    let mut lines: Vec<LineTiming> = profile
        .lines
        .iter()
        .map(|stat| LineTiming {
            line: stat.line,
            hits: stat.hits,
            time: stat.time,
            time_per_hit: if stat.hits == 0 {
                0.0
            } else {
                stat.time / stat.hits as f64
            },
        })
        .collect();
    lines.sort_by_key(|l| l.line);
    LineProfileSection {
        function: profile.function.clone(),
        file: profile.file.clone(),
        first_line: profile.first_line,
        total_time: lines.iter().map(|l| l.time).sum(),
        lines,
    }
}

/// Edge from a caller to a callee, with the timings measured along it
struct Edge<'a> {
    callee: &'a FunctionKey,
    calls: u64,
    self_time: f64,
    cumulative_time: f64,
}

struct TreeBuilder<'a> {
    children: HashMap<&'a FunctionKey, Vec<Edge<'a>>>,
    budget: usize,
}

impl<'a> TreeBuilder<'a> {
    fn node(
        &mut self,
        key: &'a FunctionKey,
        calls: u64,
        self_time: f64,
        cumulative_time: f64,
        path: &mut Vec<&'a FunctionKey>,
    ) -> CallTreeNode {
        self.budget = self.budget.saturating_sub(1);
        let mut node = CallTreeNode {
            function: key.function.clone(),
            file: key.file.clone(),
            line: key.line,
            calls,
            self_time,
            cumulative_time,
            recursive: false,
            children: Vec::new(),
        };
        if path.contains(&key) {
            node.recursive = true;
            return node;
        }
        if path.len() >= MAX_TREE_DEPTH {
            return node;
        }

        path.push(key);
        let edges: Vec<(&'a FunctionKey, u64, f64, f64)> = self
            .children
            .get(key)
            .map(|edges| {
                edges
                    .iter()
                    .map(|e| (e.callee, e.calls, e.self_time, e.cumulative_time))
                    .collect()
            })
            .unwrap_or_default();
        for (callee, calls, self_time, cumulative_time) in edges {
            if self.budget == 0 {
                break;
            }
            let child = self.node(callee, calls, self_time, cumulative_time, path);
            node.children.push(child);
        }
        path.pop();
        node
    }
}

/// Reconstruct a call tree from per-function caller edges.
///
/// Roots are functions with no recorded caller; when every function has one
/// (a profile made only of a cycle) the most expensive function is the root.
/// Recursion is cut at the first repeat on a path and marked `recursive`.
pub fn build_call_tree(stats: &[FunctionStat]) -> Vec<CallTreeNode> {
    let mut children: HashMap<&FunctionKey, Vec<Edge<'_>>> = HashMap::new();
    for stat in stats {
        for caller in &stat.callers {
            children.entry(&caller.key).or_default().push(Edge {
                callee: &stat.key,
                calls: caller.calls,
                self_time: caller.self_time,
                cumulative_time: caller.cumulative_time,
            });
        }
    }
    for edges in children.values_mut() {
        edges.sort_by(|a, b| {
            b.cumulative_time
                .total_cmp(&a.cumulative_time)
                .then_with(|| a.callee.cmp(b.callee))
        });
    }

    let mut roots: Vec<&FunctionStat> = stats.iter().filter(|s| s.callers.is_empty()).collect();
    if roots.is_empty() {
        roots.extend(stats.iter().min_by(|a, b| hotspot_order(a, b)));
    }
    roots.sort_by(|a, b| hotspot_order(a, b));

    let mut builder = TreeBuilder {
        children,
        budget: MAX_TREE_NODES,
    };
    let mut path = Vec::new();
    let mut tree = Vec::with_capacity(roots.len());
    for root in roots {
        if builder.budget == 0 {
            break;
        }
        tree.push(builder.node(
            &root.key,
            root.calls,
            root.self_time,
            root.cumulative_time,
            &mut path,
        ));
    }
    tree
}
