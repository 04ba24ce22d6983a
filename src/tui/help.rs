use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("Ctrl-Q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("Ctrl-R", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("F5", Style::default().fg(Color::Magenta)),
            Span::raw("      Run the buffer"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("Ctrl-S", Style::default().fg(Color::Magenta)),
            Span::raw("           Save last outcome as JSON"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("F1", Style::default().fg(Color::Magenta)),
            Span::raw("               Toggle this help"),
        ]),
        Line::from(""),
        Line::from("Editing:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("arrows", Style::default().fg(Color::Magenta)),
            Span::raw("           Move the cursor"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("Home/End", Style::default().fg(Color::Magenta)),
            Span::raw("         Jump within the line"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("Tab", Style::default().fg(Color::Magenta)),
            Span::raw("              Insert four spaces"),
        ]),
        Line::from(""),
        Line::from("The engine module loads on the first run and is reused after."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, area);
    f.render_widget(p, area);
}
