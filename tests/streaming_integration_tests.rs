// Integration tests for StreamingParser over realistic worker output

#[cfg(test)]
mod streaming_integration_tests {
    use research_supervisor_lib::agents::format_parsers::generic::TRUNCATION_MARKER;
    use research_supervisor_lib::agents::{ParsedActivity, ParserConfig, StreamingParser};
    use research_supervisor_lib::ActivityKind;

    const TRANSCRIPT: &str = concat!(
        "{\"type\": \"init\", \"topic\": \"best espresso machines\", \"provider\": \"openai\", \"model\": \"gpt-4o-mini\"}\n",
        "{\"type\": \"tools_loaded\", \"count\": 4}\n",
        "Planning the search strategy\n",
        "\"function_call\": {\n",
        "  \"name\": \"web_search\",\n",
        "  \"arguments\": {\n",
        "    \"query\": \"best espresso machines\",\n",
        "    \"max_results\": 5\n",
        "  }\n",
        "}\n",
        "\"result\": \"1. Breville Barista Express\\n\n",
        "2. Gaggia \\\"Classic\\\" Pro\",\n",
        "{\"type\": \"progress\", \"message\": \"Comparing machines\", \"percentage\": 40}\n",
        "\"tool_name\": \"update_progress\",\n",
        "\"arguments\": {\n",
        "\"percentage\": 100,\n",
        "\"current_task\": \"Writing report\"\n",
        "}\n",
        "{\"type\": \"assistant_response\", \"response\": \"The Breville wins.\"}\n",
    );

    fn parse_in_chunks(input: &[u8], sizes: &[usize]) -> Vec<ParsedActivity> {
        let mut parser = StreamingParser::new(ParserConfig::default());
        let mut out = Vec::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < input.len() {
            let size = sizes[i % sizes.len()].max(1);
            let end = (offset + size).min(input.len());
            out.extend(parser.feed(&input[offset..end]));
            offset = end;
            i += 1;
        }
        out.extend(parser.finish());
        out
    }

    fn summary(activities: &[ParsedActivity]) -> Vec<(ActivityKind, String)> {
        activities
            .iter()
            .map(|a| (a.kind, a.description.clone()))
            .collect()
    }

    #[test]
    fn test_chunking_does_not_change_activities() {
        let bytes = TRANSCRIPT.as_bytes();
        let whole = summary(&parse_in_chunks(bytes, &[bytes.len()]));

        for sizes in [&[1][..], &[2, 3], &[7], &[13, 1, 64], &[4096]] {
            let chunked = summary(&parse_in_chunks(bytes, sizes));
            assert_eq!(chunked, whole, "chunk sizes {:?}", sizes);
        }
    }

    #[test]
    fn test_transcript_activities() {
        let out = parse_in_chunks(TRANSCRIPT.as_bytes(), &[5]);
        let kinds: Vec<ActivityKind> = out.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActivityKind::Init,
                ActivityKind::Lifecycle,
                ActivityKind::Text,
                ActivityKind::ToolCall,
                ActivityKind::ToolResult,
                ActivityKind::Progress,
                ActivityKind::ToolCall,
                ActivityKind::AssistantResponse,
            ]
        );

        assert_eq!(out[3].description, "web_search: \"best espresso machines\"");
        assert_eq!(
            out[4].description,
            "1. Breville Barista Express\n\n2. Gaggia \"Classic\" Pro"
        );

        let progress = out[5].progress_update().unwrap();
        assert_eq!(progress.percentage, 40.0);
        assert!(!out[5].completion_signal());

        assert!(out[6].completion_signal());
        assert_eq!(
            out[6].progress_update().unwrap().current_task.as_deref(),
            Some("Writing report")
        );
    }

    #[test]
    fn test_single_pair_lines_reassemble_one_call() {
        // Arguments may trickle in across several reads
        let mut parser = StreamingParser::new(ParserConfig::default());
        let mut out = parser.feed(b"{\"tool_name\":\"web_search\"}\n");
        out.extend(parser.feed(b"{\"query\":\"best esp"));
        out.extend(parser.feed(b"resso machines\"}\n"));
        out.extend(parser.feed(b"}}\n"));
        out.extend(parser.finish());

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ActivityKind::ToolCall);
        assert_eq!(out[0].description, "web_search: \"best espresso machines\"");
    }

    #[test]
    fn test_file_read_results_use_larger_cap() {
        let config = ParserConfig {
            result_max_length: 10,
            read_file_max_length: 40,
            ..ParserConfig::default()
        };
        let body = "x".repeat(30);

        let mut parser = StreamingParser::new(config);
        let mut out = parser.feed(
            format!(
                "{{\"type\": \"tool_call\", \"tool\": \"read_file\", \"args\": {{\"path\": \"notes.md\"}}}}\n\"result\": \"{}\"\n",
                body
            )
            .as_bytes(),
        );
        out.extend(parser.finish());
        assert_eq!(out[1].kind, ActivityKind::ToolResult);
        assert_eq!(out[1].description, body);

        let mut parser = StreamingParser::new(config);
        let mut out = parser.feed(format!("\"result\": \"{}\"\n", body).as_bytes());
        out.extend(parser.finish());
        assert_eq!(
            out[0].description,
            format!("{}{}", "x".repeat(10), TRUNCATION_MARKER)
        );
    }
}
