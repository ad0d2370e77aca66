use anyhow::Result;
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Blegraph 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行测试 (含 bluez 特性时需要 BlueZ 开发环境)
    Test {
        #[arg(long)]
        bluez: bool,
    },
    /// 格式检查 + clippy
    Check,
    /// 用样本重放一次通知轨迹
    Demo,
    /// 运行测试并生成覆盖率报告
    Coverage,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = std::env::var("CARGO_MANIFEST_DIR")
        .map(std::path::PathBuf::from)
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .map_or_else(std::env::current_dir, Ok)?;
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Test { bluez } => test(&sh, bluez)?,
        Commands::Check => check(&sh)?,
        Commands::Demo => demo(&sh)?,
        Commands::Coverage => coverage(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn test(sh: &Shell, bluez: bool) -> Result<()> {
    println!("🧪 运行测试...");
    if bluez {
        cmd!(sh, "cargo test --workspace --features blegraph-core/bluez").run()?;
    } else {
        cmd!(sh, "cargo test --workspace").run()?;
    }
    println!("✅ 测试完成");
    Ok(())
}

fn check(sh: &Shell) -> Result<()> {
    println!("🔍 检查代码...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    println!("✅ 检查通过");
    Ok(())
}

fn demo(sh: &Shell) -> Result<()> {
    println!("🎬 重放样本轨迹...");
    cmd!(sh, "cargo run -p blegraph-cli -- inspect demos/sensor.json").run()?;
    cmd!(
        sh,
        "cargo run -p blegraph-cli -- replay demos/sensor.json demos/sensor-trace.json"
    )
    .run()?;
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    println!("📊 运行测试覆盖率分析...");

    // 检查 cargo-tarpaulin 是否安装
    if cmd!(sh, "cargo tarpaulin --version").run().is_err() {
        println!("📦 安装 cargo-tarpaulin...");
        cmd!(sh, "cargo install cargo-tarpaulin").run()?;
    }

    println!("🔍 分析中...");
    cmd!(
        sh,
        "cargo tarpaulin --packages blegraph-core --out Html --output-dir target/coverage"
    )
    .run()?;

    println!("✅ 覆盖率报告已生成");
    println!("   HTML 报告: target/coverage/tarpaulin-report.html");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ 清理完成");
    Ok(())
}
