use anyhow::{Result, anyhow};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;

const REPORT_STYLE: &str = r#"
body { font-family: Arial, sans-serif; font-size: 12px; line-height: 1.6; color: #333; margin: 0; }
h1 { font-size: 24px; color: #2c3e50; border-bottom: 2px solid #2c3e50; padding-bottom: 6px; }
h2 { font-size: 20px; color: #34495e; margin-top: 24px; }
h3 { font-size: 16px; color: #34495e; }
table { border-collapse: collapse; width: 100%; margin: 12px 0; }
th, td { border: 1px solid #ccc; padding: 6px 8px; text-align: left; }
th { background-color: #f2f2f2; }
code { background-color: #f5f5f5; padding: 1px 4px; }
blockquote { border-left: 4px solid #ccc; margin-left: 0; padding-left: 12px; color: #666; }
"#;

/// PDF渲染器
///
/// 把markdown报告转换为带样式的HTML，再调用外部工具（默认wkhtmltopdf）生成PDF
pub struct PdfRenderer {
    tool: String,
}

impl PdfRenderer {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    /// 检查渲染工具是否可用
    pub async fn is_available(&self) -> bool {
        match TokioCommand::new(&self.tool)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    /// markdown -> 完整的HTML页面
    pub fn to_html(markdown_text: &str, title: &str) -> Result<String> {
        let body = markdown::to_html_with_options(markdown_text, &markdown::Options::gfm())
            .map_err(|e| anyhow!("markdown conversion failed: {:?}", e))?;
        Ok(format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<title>{}</title>\n<style>{}</style>\n</head>\n<body>\n{}\n</body>\n</html>\n",
            escape_html(title),
            REPORT_STYLE,
            body
        ))
    }

    /// 渲染PDF。工具不可用时返回 `Ok(false)`，由调用方记录警告
    pub async fn render(&self, html_path: &Path, pdf_path: &Path) -> Result<bool> {
        if !self.is_available().await {
            return Ok(false);
        }

        let output = TokioCommand::new(&self.tool)
            .args(["--page-size", "Letter"])
            .args(["--margin-top", "0.75in"])
            .args(["--margin-right", "0.75in"])
            .args(["--margin-bottom", "0.75in"])
            .args(["--margin-left", "0.75in"])
            .args(["--encoding", "UTF-8"])
            .arg("--quiet")
            .arg(html_path)
            .arg(pdf_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(anyhow!(
                "{} exited with status {}: {}",
                self.tool,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(pdf_path.exists())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
