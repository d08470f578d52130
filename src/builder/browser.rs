use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::{Browser, BrowserConfig};
use colored::*;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info};
use url::Url;

use crate::config::PdfOptions;
use crate::error::{ConvertError, Result};
use crate::extractor::{ExtractedSection, SectionContent};
use crate::PdfMerger;

/// Prints HTML sections to PDF with one headless Chromium instance.
pub struct HtmlRenderer<'a> {
    chrome: &'a Path,
    options: &'a PdfOptions,
    scratch_dir: PathBuf,
}

/// Output of the browser pass: per-section PDFs merged in reading order.
pub struct RenderedHtml {
    pub pdf: lopdf::Document,
    pub pages: usize,
}

impl<'a> HtmlRenderer<'a> {
    pub fn new(chrome: &'a Path, options: &'a PdfOptions, scratch_dir: &Path) -> Self {
        Self {
            chrome,
            options,
            scratch_dir: scratch_dir.to_path_buf(),
        }
    }

    pub async fn render(&self, sections: &[ExtractedSection]) -> Result<RenderedHtml> {
        info!("Launching {}", self.chrome.display().to_string().green());

        let mut builder = BrowserConfig::builder()
            .chrome_executable(self.chrome)
            .user_data_dir(self.scratch_dir.join("chrome-profile"));
        if self.options.no_sandbox {
            builder = builder.no_sandbox();
        }
        let config = builder
            .build()
            .map_err(|e| ConvertError::Render(format!("Failed to create browser config: {}", e)))?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ConvertError::Render(format!("Failed to launch browser: {}", e)))?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(err) = h {
                    // Only log if it's not a common websocket deserialization error
                    let err_str = err.to_string();
                    if !err_str.contains("data did not match any variant")
                        && !err_str.contains("untagged enum Message")
                    {
                        error!("Browser handler error: {}", err);
                    } else {
                        debug!("Chrome protocol message ignored: {}", err);
                    }
                }
            }
        });

        let result = self.render_internal(&browser, sections).await;

        browser.close().await.ok();
        browser.wait().await.ok();
        handle.abort();

        result
    }

    async fn render_internal(&self, browser: &Browser, sections: &[ExtractedSection]) -> Result<RenderedHtml> {
        let pages_dir = self.scratch_dir.join("sections");
        fs::create_dir_all(&pages_dir)
            .await
            .map_err(|e| ConvertError::Render(format!("Failed to create sections directory: {}", e)))?;

        let mut merger = PdfMerger::new();
        let mut pages = 0;

        for (position, section) in sections.iter().enumerate() {
            let SectionContent::Html(html) = &section.content else {
                return Err(ConvertError::Render(format!(
                    "section {} has no HTML content",
                    section.index + 1
                )));
            };

            let html_path = pages_dir.join(format!("{:04}.html", section.index + 1));
            fs::write(&html_path, html)
                .await
                .map_err(|e| ConvertError::Render(format!("Failed to write {}: {}", html_path.display(), e)))?;

            let pdf_data = self.print_page(browser, &html_path).await?;
            let section_pages = merger.add_bytes(&section.href, &pdf_data)?;
            pages += section_pages;

            debug!(
                "Rendered section {}/{} \"{}\" into {} pages",
                position + 1,
                sections.len(),
                section.href.blue(),
                section_pages
            );
        }

        Ok(RenderedHtml {
            pdf: merger.merge()?,
            pages,
        })
    }

    async fn print_page(&self, browser: &Browser, html_path: &Path) -> Result<Vec<u8>> {
        let url = Url::from_file_path(html_path)
            .map_err(|_| ConvertError::Render(format!("Invalid section path {}", html_path.display())))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ConvertError::Render(format!("Failed to create new page: {}", e)))?;

        page.goto(url.as_str())
            .await
            .map_err(|e| ConvertError::Render(format!("Failed to navigate to {}: {}", url, e)))?;

        page.wait_for_navigation()
            .await
            .map_err(|e| ConvertError::Render(format!("Failed to wait for navigation: {}", e)))?;

        let (paper_width, paper_height) = self.options.paper.inches();
        let params = PrintToPdfParams {
            print_background: Some(self.options.print_background),
            scale: Some(self.options.scale),
            paper_width: Some(paper_width),
            paper_height: Some(paper_height),
            margin_top: Some(self.options.margin_top),
            margin_right: Some(self.options.margin_right),
            margin_bottom: Some(self.options.margin_bottom),
            margin_left: Some(self.options.margin_left),
            ..Default::default()
        };

        let pdf_data = page
            .pdf(params)
            .await
            .map_err(|e| ConvertError::Render(format!("Failed to generate PDF: {}", e)))?;

        page.close().await.ok();
        Ok(pdf_data)
    }
}
