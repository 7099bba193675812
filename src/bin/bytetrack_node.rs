/// ByteTrack 跟踪节点 (独立进程)
///
/// 从文件或标准输入逐行读取检测框批次 (JSON),
/// 把跟踪结果逐行写到文件或标准输出。
use anyhow::Context;
use bytetrack_nodes::nodes::bytetrack_node::bridge;
use bytetrack_nodes::nodes::TrackAdapter;
use bytetrack_nodes::{ByteTrackConfig, ByteTracker, ParamsFile, TrackerParams};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "ByteTrack 跟踪节点 - 检测框 → 跟踪框 (JSON lines)", long_about = None)]
struct Args {
    #[command(flatten)]
    tracker: TrackerParams,

    /// JSON参数文件 (使用其中 "bytetrack_node" 一节, 覆盖命令行参数)
    #[arg(long)]
    params: Option<PathBuf>,

    /// 输入文件 (缺省为标准输入)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// 输出文件 (缺省为标准输出)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    bytetrack_nodes::init_tracing();
    let args = Args::parse();

    let params: TrackerParams = match &args.params {
        Some(path) => ParamsFile::load(path)?.get("bytetrack_node")?,
        None => args.tracker.clone(),
    };
    params.validate()?;

    let config = ByteTrackConfig::new(params.video_fps as u32, params.track_buffer as u32);
    info!(
        "🚀 bytetrack_node: {} → {} (max_time_lost={})",
        params.sub_bboxes_topic_name,
        params.pub_bboxes_topic_name,
        config.max_time_lost()
    );
    let mut adapter = TrackAdapter::new(ByteTracker::new(config));

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let stats = bridge(reader, &mut writer, &mut adapter)?;
    info!(
        "✅ processed {} batches, wrote {}, skipped {}",
        adapter.processed(),
        stats.written,
        stats.skipped
    );
    Ok(())
}
