//! Report document pushed to the collection endpoint.
//! Keep the serde types minimal and stable; they define the wire format.

use std::io::Write;

use flate2::{write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};

use crate::sample::Sample;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub name: String,
    pub ram_usage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPoint {
    pub cpu_usage: u32,
    pub processes: Vec<ProcessEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    pub data_points: Vec<DataPoint>,
}

impl Report {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Rounds a percentage onto the 0..=100 wire scale.
fn percent(v: f32) -> u32 {
    if v.is_nan() {
        return 0;
    }
    v.round().clamp(0.0, 100.0) as u32
}

#[derive(Debug, Clone)]
pub struct ReportBuilder {
    agent_name: String,
    top_n: usize,
}

impl ReportBuilder {
    pub fn new(agent_name: impl Into<String>, top_n: usize) -> Self {
        Self {
            agent_name: agent_name.into(),
            top_n,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// One data point per sample, each with exactly `top_n` processes.
    ///
    /// Samples with fewer processes are padded with blank entries so every
    /// data point has the same shape.
    pub fn build(&self, batch: &[Sample]) -> Report {
        let data_points = batch
            .iter()
            .map(|s| {
                let mut processes: Vec<ProcessEntry> = s
                    .process_stats
                    .iter()
                    .take(self.top_n)
                    .map(|p| ProcessEntry {
                        name: p.command_line.clone(),
                        ram_usage: percent(p.memory_share),
                    })
                    .collect();
                processes.resize_with(self.top_n, || ProcessEntry {
                    name: String::new(),
                    ram_usage: 0,
                });
                DataPoint {
                    cpu_usage: percent(s.cpu_utilization * 100.0),
                    processes,
                }
            })
            .collect();
        Report {
            name: self.agent_name.clone(),
            data_points,
        }
    }
}

pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::fast());
    enc.write_all(data)?;
    enc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::ProcessStat;
    use std::io::Read;

    fn sample(cpu: f32, shares: &[f32]) -> Sample {
        Sample {
            cpu_utilization: cpu,
            process_stats: shares
                .iter()
                .enumerate()
                .map(|(i, m)| ProcessStat {
                    memory_share: *m,
                    command_line: format!("proc{i}"),
                })
                .collect(),
        }
    }

    #[test]
    fn every_data_point_has_top_n_in_rank_order() {
        let shares: Vec<f32> = (0..15).rev().map(|v| v as f32 * 2.2).collect();
        let batch: Vec<Sample> = (0..4).map(|i| sample(i as f32 / 4.0, &shares)).collect();
        let r = ReportBuilder::new("host-a", 10).build(&batch);
        assert_eq!(r.name, "host-a");
        assert_eq!(r.data_points.len(), 4);
        for dp in &r.data_points {
            assert_eq!(dp.processes.len(), 10);
            assert_eq!(dp.processes[0].name, "proc0");
            assert!(dp
                .processes
                .windows(2)
                .all(|w| w[0].ram_usage >= w[1].ram_usage));
        }
        assert_eq!(r.data_points[1].cpu_usage, 25);
    }

    #[test]
    fn short_process_list_is_padded() {
        let r = ReportBuilder::new("a", 10).build(&[sample(0.5, &[12.6, 3.2])]);
        let procs = &r.data_points[0].processes;
        assert_eq!(procs.len(), 10);
        assert_eq!(procs[0].ram_usage, 13);
        assert_eq!(procs[1].ram_usage, 3);
        assert!(procs[2..].iter().all(|p| p.name.is_empty() && p.ram_usage == 0));
    }

    #[test]
    fn percentages_round_and_clamp() {
        assert_eq!(percent(66.67), 67);
        assert_eq!(percent(0.49), 0);
        assert_eq!(percent(-3.0), 0);
        assert_eq!(percent(250.0), 100);
        assert_eq!(percent(f32::NAN), 0);
    }

    #[test]
    fn wire_shape() {
        let r = ReportBuilder::new("viswa", 1).build(&[sample(2.0 / 3.0, &[75.0])]);
        let json = String::from_utf8(r.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"name":"viswa","data_points":[{"cpu_usage":67,"processes":[{"name":"proc0","ram_usage":75}]}]}"#
        );
    }

    #[test]
    fn empty_batch_has_no_data_points() {
        let r = ReportBuilder::new("x", 10).build(&[]);
        assert!(r.data_points.is_empty());
    }

    #[test]
    fn gzip_inflates_back() {
        let body = br#"{"name":"x","data_points":[]}"#;
        let packed = gzip(body).unwrap();
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(&packed[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, body);
    }
}
