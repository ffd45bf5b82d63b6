mod change_stream_test;
