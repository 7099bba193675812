/// ByteTrack 可视化 (ByteTrack viewer)
///
/// 系统架构:
/// 1. 数据源线程: 合成图像 + 检测框
/// 2. 跟踪线程:   检测框 → 跟踪框
/// 3. 可视化线程: 时间同步 + 叠加绘制
/// 4. 主线程:     窗口显示 (macroquad事件循环), Esc 退出
use anyhow::Context;
use bytetrack_nodes::display::{Key, WindowDisplay, WindowEvents, WINDOW_NAME};
use bytetrack_nodes::nodes::{self, ByteTrackViewer, NodeContext, Shutdown, SourceParams};
use bytetrack_nodes::{xbus, ParamsFile, TrackerParams, ViewerParams};
use clap::Parser;
use macroquad::prelude::{
    clear_background, draw_text, draw_texture_ex, get_char_pressed, is_key_pressed, next_frame,
    screen_height, screen_width, vec2, DrawTextureParams, FilterMode, KeyCode, Texture2D, BLACK,
    GREEN, WHITE,
};
use macroquad::window::Conf;
use std::path::PathBuf;
use std::thread::JoinHandle;
use tracing::{error, info};

const WINDOW_WIDTH: i32 = 1280;
const WINDOW_HEIGHT: i32 = 720;

/// 可视化参数
#[derive(Parser, Debug)]
#[command(author, version, about = "ByteTrack 可视化 - 合成数据源 + 跟踪 + 叠加显示", long_about = None)]
struct Args {
    #[command(flatten)]
    source: SourceParams,

    #[command(flatten)]
    viewer: ViewerParams,

    /// JSON参数文件 (按节点名覆盖命令行参数; 跟踪节点参数只能从这里设置)
    #[arg(long)]
    params: Option<PathBuf>,

    /// 把当前生效的参数写入该文件后继续运行
    #[arg(long)]
    save_params: Option<PathBuf>,
}

/// 窗口纹理 (分辨率不变时只更新像素)
struct FrameTexture {
    texture: Option<Texture2D>,
}

impl FrameTexture {
    fn update(&mut self, frame: image::RgbImage) {
        let rgba = image::DynamicImage::ImageRgb8(frame).to_rgba8();
        let (width, height) = (rgba.width() as u16, rgba.height() as u16);

        let needs_rebuild = match &self.texture {
            Some(tex) => tex.width() != width as f32 || tex.height() != height as f32,
            None => true,
        };
        if needs_rebuild {
            let texture = Texture2D::from_rgba8(width, height, rgba.as_raw());
            texture.set_filter(FilterMode::Linear);
            self.texture = Some(texture);
        } else if let Some(tex) = &self.texture {
            tex.update(&macroquad::texture::Image {
                bytes: rgba.into_raw(),
                width,
                height,
            });
        }
    }

    /// 按比例缩放到窗口中央
    fn draw(&self) {
        let Some(tex) = &self.texture else {
            return;
        };
        let scale = (screen_width() / tex.width()).min(screen_height() / tex.height());
        let (w, h) = (tex.width() * scale, tex.height() * scale);
        draw_texture_ex(
            tex,
            (screen_width() - w) / 2.0,
            (screen_height() - h) / 2.0,
            WHITE,
            DrawTextureParams {
                dest_size: Some(vec2(w, h)),
                ..Default::default()
            },
        );
    }
}

fn window_conf() -> Conf {
    Conf {
        window_title: WINDOW_NAME.to_string(),
        window_width: WINDOW_WIDTH,
        window_height: WINDOW_HEIGHT,
        window_resizable: true,
        ..Default::default()
    }
}

/// 各节点生效的参数
struct Setup {
    source: SourceParams,
    tracker: TrackerParams,
    viewer: ViewerParams,
}

fn resolve_params(args: &Args) -> anyhow::Result<Setup> {
    let setup = match &args.params {
        Some(path) => {
            let file = ParamsFile::load(path)?;
            Setup {
                source: file.get("synthetic_source")?,
                tracker: file.get("bytetrack_node")?,
                viewer: file.get("bytetrack_viewer")?,
            }
        }
        None => Setup {
            source: args.source.clone(),
            tracker: TrackerParams::default(),
            viewer: args.viewer.clone(),
        },
    };

    if let Some(path) = &args.save_params {
        let mut file = ParamsFile::default();
        file.insert("synthetic_source", &setup.source)?;
        file.insert("bytetrack_node", &setup.tracker)?;
        file.insert("bytetrack_viewer", &setup.viewer)?;
        file.save(path)?;
    }
    Ok(setup)
}

/// 启动三个节点; 订阅方先于发布方创建
fn launch(
    setup: Setup,
    display: WindowDisplay,
    shutdown: &Shutdown,
) -> anyhow::Result<Vec<JoinHandle<anyhow::Result<()>>>> {
    let root = NodeContext::new("bytetrack", xbus::global().clone(), shutdown.clone());

    let viewer = ByteTrackViewer::with_display(
        root.child("bytetrack_viewer"),
        setup.viewer,
        Box::new(display),
    )
    .context("bytetrack_viewer")?;
    let tracker = nodes::load_component(
        "bytetrack_node",
        root.child("bytetrack_node"),
        serde_json::to_value(&setup.tracker)?,
    )
    .context("bytetrack_node")?;
    let source = nodes::load_component(
        "synthetic_source",
        root.child("synthetic_source"),
        serde_json::to_value(&setup.source)?,
    )
    .context("synthetic_source")?;

    let mut handles = Vec::new();
    for component in [Box::new(viewer) as Box<dyn nodes::Component>, tracker, source] {
        handles.push(nodes::spawn(component, shutdown.clone())?);
    }
    Ok(handles)
}

/// 主线程事件循环
async fn event_loop(mut events: WindowEvents, shutdown: &Shutdown) {
    let mut frame_texture = FrameTexture { texture: None };
    let mut frames = 0u64;

    while !shutdown.is_triggered() {
        if is_key_pressed(KeyCode::Escape) {
            events.send_key(Key::Escape);
        }
        while let Some(c) = get_char_pressed() {
            events.send_key(Key::Char(c));
        }

        if let Some(frame) = events.latest_frame() {
            frame_texture.update(frame);
            frames += 1;
        }
        if events.is_closed() {
            break;
        }

        clear_background(BLACK);
        frame_texture.draw();
        draw_text(
            &format!("{} | frames: {} | Esc: quit", events.name, frames),
            10.0,
            24.0,
            22.0,
            GREEN,
        );
        next_frame().await;
    }
}

async fn run() -> anyhow::Result<()> {
    bytetrack_nodes::init_tracing();
    let args = Args::parse();
    let setup = resolve_params(&args)?;

    let shutdown = Shutdown::new();
    let (display, events) = WindowDisplay::new(WINDOW_NAME);
    let handles = launch(setup, display, &shutdown)?;
    info!("🚀 {} 启动, 按 Esc 退出", WINDOW_NAME);

    event_loop(events, &shutdown).await;

    shutdown.trigger();
    let mut failed = false;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(_)) => failed = true,
            Err(_) => {
                error!("❌ node thread panicked");
                failed = true;
            }
        }
    }
    if failed {
        anyhow::bail!("one or more nodes failed");
    }
    info!("👋 bye");
    Ok(())
}

#[macroquad::main(window_conf)]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }
}
