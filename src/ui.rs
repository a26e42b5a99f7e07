use anyhow::Result;
use tally_audit::db::{StoredFinding, TableCounts};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Summary,
    Findings,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Summary => Page::Findings,
            Page::Findings => Page::Summary,
        }
    }

    pub fn previous(&self) -> Self {
        self.next()
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Summary => "Summary",
            Page::Findings => "Findings",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterType {
    None,
    Errors,
    Warnings,
    Info,
    ByCategory(String),
}

pub struct App {
    pub findings: Vec<StoredFinding>,
    pub filtered_findings: Vec<StoredFinding>,
    pub counts: TableCounts,
    pub state: TableState,
    pub current_page: Page,
    pub show_detail: bool,
    pub active_filter: FilterType,
}

impl App {
    pub fn new(findings: Vec<StoredFinding>, counts: TableCounts) -> Self {
        let mut state = TableState::default();
        if !findings.is_empty() {
            state.select(Some(0));
        }
        let filtered_findings = findings.clone();

        Self {
            findings,
            filtered_findings,
            counts,
            state,
            current_page: Page::Findings,
            show_detail: false,
            active_filter: FilterType::None,
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_finding(&self) -> Option<&StoredFinding> {
        self.state
            .selected()
            .and_then(|i| self.filtered_findings.get(i))
    }

    pub fn apply_filter(&mut self, filter: FilterType) {
        self.active_filter = filter.clone();
        self.filtered_findings = match filter {
            FilterType::None => self.findings.clone(),
            FilterType::Errors => self.by_severity("error"),
            FilterType::Warnings => self.by_severity("warning"),
            FilterType::Info => self.by_severity("info"),
            FilterType::ByCategory(ref category) => self
                .findings
                .iter()
                .filter(|f| &f.category == category)
                .cloned()
                .collect(),
        };
        self.state
            .select(if self.filtered_findings.is_empty() { None } else { Some(0) });
    }

    fn by_severity(&self, severity: &str) -> Vec<StoredFinding> {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .cloned()
            .collect()
    }

    pub fn clear_filter(&mut self) {
        self.apply_filter(FilterType::None);
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn next(&mut self) {
        let len = self.filtered_findings.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            Some(_) => 0,
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.filtered_findings.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.filtered_findings.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().unwrap_or(0);
        self.state.select(Some((i + 20).min(len - 1)));
    }

    pub fn page_up(&mut self) {
        let i = self.state.selected().unwrap_or(0);
        self.state.select(Some(i.saturating_sub(20)));
    }

    /// Per-severity message counts for the header.
    pub fn severity_summary(&self) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        for severity in ["error", "warning", "info"] {
            let count = self
                .findings
                .iter()
                .filter(|f| f.severity == severity)
                .count();
            out.push((severity.to_string(), count));
        }
        out
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::Char('c') => {
                    app.clear_filter();
                    app.current_page = Page::Findings;
                }
                KeyCode::Char('e') => {
                    app.apply_filter(FilterType::Errors);
                    app.current_page = Page::Findings;
                }
                KeyCode::Char('w') => {
                    app.apply_filter(FilterType::Warnings);
                    app.current_page = Page::Findings;
                }
                KeyCode::Char('i') => {
                    app.apply_filter(FilterType::Info);
                    app.current_page = Page::Findings;
                }
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.state.select(Some(0)),
                KeyCode::End => {
                    if !app.filtered_findings.is_empty() {
                        app.state.select(Some(app.filtered_findings.len() - 1));
                    }
                }
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail && app.current_page == Page::Findings {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        render_table(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        match app.current_page {
            Page::Summary => render_summary(f, chunks[1], app),
            Page::Findings => render_table(f, chunks[1], app),
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![Span::styled(
        " tally-audit ",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )];
    for page in [Page::Summary, Page::Findings] {
        let style = if page == app.current_page {
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        spans.push(Span::raw(" "));
        spans.push(Span::styled(format!(" {} ", page.title()), style));
    }
    spans.push(Span::raw("  "));
    for (severity, count) in app.severity_summary() {
        let color = severity_color(&severity);
        spans.push(Span::styled(
            format!("{severity}: {count}  "),
            Style::default().fg(color),
        ));
    }

    let header = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );
    f.render_widget(header, area);
}

fn severity_color(severity: &str) -> Color {
    match severity {
        "error" => Color::Red,
        "warning" => Color::Yellow,
        "info" => Color::Cyan,
        _ => Color::White,
    }
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Severity", "Category", "Source", "Recorded", "Message"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.filtered_findings.iter().map(|finding| {
        let color = severity_color(&finding.severity);
        let cells = vec![
            Cell::from(finding.severity.clone()).style(Style::default().fg(color)),
            Cell::from(finding.category.clone()),
            Cell::from(truncate(&finding.source, 24)),
            Cell::from(truncate(&finding.recorded_at, 19)),
            Cell::from(truncate(&finding.message, 60)),
        ];
        Row::new(cells).height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(9),
            Constraint::Length(20),
            Constraint::Length(26),
            Constraint::Length(21),
            Constraint::Min(30),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Findings "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_summary(f: &mut Frame, area: Rect, app: &App) {
    let mut lines = vec![
        Line::from(Span::styled(
            "Imported data",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(format!("  precincts:       {}", app.counts.precincts)),
        Line::from(format!("  candidate votes: {}", app.counts.candidate_votes)),
        Line::from(format!("  tapes:           {}", app.counts.tapes)),
        Line::from(""),
        Line::from(Span::styled(
            "Findings",
            Style::default().add_modifier(Modifier::BOLD),
        )),
    ];
    for (severity, count) in app.severity_summary() {
        lines.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(
                format!("{severity:8}"),
                Style::default().fg(severity_color(&severity)),
            ),
            Span::raw(format!(" {count}")),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(
        "  e/w/i filter by severity, c clear, Tab switch page",
    ));

    let summary = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Audit Summary "),
    );
    f.render_widget(summary, area);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let lines = match app.selected_finding() {
        Some(finding) => vec![
            Line::from(vec![
                Span::styled("Severity: ", Style::default().add_modifier(Modifier::BOLD)),
                Span::styled(
                    finding.severity.clone(),
                    Style::default().fg(severity_color(&finding.severity)),
                ),
            ]),
            Line::from(format!("Category: {}", finding.category)),
            Line::from(format!("Source:   {}", finding.source)),
            Line::from(format!("Recorded: {}", finding.recorded_at)),
            Line::from(format!("Run:      {}", finding.run_id)),
            Line::from(""),
            Line::from(wrap_text(&finding.message, area.width.saturating_sub(4) as usize)),
        ],
        None => vec![Line::from("No finding selected")],
    };

    let detail = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Detail "),
    );
    f.render_widget(detail, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);
    let total = app.filtered_findings.len();

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, total),
        Style::default().fg(Color::Cyan),
    )];

    if app.active_filter != FilterType::None {
        let filter_name = match &app.active_filter {
            FilterType::Errors => "errors",
            FilterType::Warnings => "warnings",
            FilterType::Info => "info",
            FilterType::ByCategory(category) => category.as_str(),
            FilterType::None => "",
        };
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(
            format!("Filter: {}", filter_name),
            Style::default().fg(Color::Green),
        ));
        status_spans.push(Span::raw(" ("));
        status_spans.push(Span::styled("c", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" clear)"));
    }

    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("Enter", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Detail | "));
    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Page | "));
    status_spans.push(Span::styled("e/w/i", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Filter | "));
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Nav | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

fn wrap_text(text: &str, width: usize) -> String {
    if width == 0 {
        return text.to_string();
    }
    let mut out = String::new();
    let mut line_len = 0;
    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if line_len > 0 && line_len + word_len + 1 > width {
            out.push('\n');
            line_len = 0;
        } else if line_len > 0 {
            out.push(' ');
            line_len += 1;
        }
        out.push_str(word);
        line_len += word_len;
    }
    out
}
